use std::{
    io::Write,
    net::TcpStream,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use gravstream::{
    cluster::{self, Schedule},
    compute_method::ComputeMethod,
    error::Error,
    prelude::*,
    protocol::{self, Code},
    scenario::random_cloud,
};
use rand::prelude::*;

const LIMIT: u32 = 1 << 16;

fn two_bodies() -> (Vec<Body>, Parameters) {
    let bodies = vec![
        Body::new(Vec3::new(-5.0, 0.0, 0.0), 1e4),
        Body::new(Vec3::new(5.0, 0.0, 0.0), 1e4),
    ];
    let params = Parameters {
        gravitation: 6.674e-11,
        timestep: 1.0,
        softening: 1.0,
    };

    (bodies, params)
}

fn serve(mode: ServeMode) -> (Arc<SnapshotStore>, std::net::SocketAddr) {
    let store = Arc::new(SnapshotStore::new());
    let server = Server::bind("127.0.0.1:0", store.clone(), mode)
        .unwrap()
        .spawn()
        .unwrap();

    (store, server.local_addr())
}

#[test]
fn two_bodies_move_inward_as_seen_by_a_viewer() {
    let (bodies, params) = two_bodies();
    let (store, addr) = serve(ServeMode::Pull);
    let schedule = Schedule {
        ranks: 2,
        iterations: 1,
        publish_every: 1,
    };

    cluster::run(&bodies, params, schedule, &store, |_| Ok(Sequential)).unwrap();

    let mut client = Client::connect(addr, LIMIT).unwrap();
    let [b0, b1]: [Body; 2] = client.request_bodies().unwrap().try_into().unwrap();

    let moved0 = b0.position.x - bodies[0].position.x;
    let moved1 = bodies[1].position.x - b1.position.x;
    assert!(moved0 > 0.0);
    assert_eq!(moved0, moved1);

    client.disconnect().unwrap();
}

#[test]
fn empty_store_serves_zero_bodies() {
    let (_store, addr) = serve(ServeMode::Pull);

    let mut stream = TcpStream::connect(addr).unwrap();
    protocol::write_code(&mut stream, Code::RequestBodyData).unwrap();

    assert!(protocol::read_bodies(&mut stream, LIMIT).unwrap().is_empty());
}

#[test]
fn viewers_follow_a_running_simulation() {
    let bodies = random_cloud(&mut StdRng::seed_from_u64(11), 32);
    let (store, addr) = serve(ServeMode::ChangeGated);

    let schedule = Schedule {
        ranks: 4,
        iterations: 200,
        publish_every: 10,
    };
    let params = Parameters {
        gravitation: 1e-3,
        timestep: 1e-2,
        softening: 1.0,
    };

    let summary = thread::scope(|scope| {
        let run =
            scope.spawn(|| cluster::run(&bodies, params, schedule, &store, |_| Ok(Sequential)));

        let mut client = Client::connect(addr, LIMIT).unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);

        while !run.is_finished() && Instant::now() < deadline {
            let frame = client.request_bodies().unwrap();
            assert!(frame.is_empty() || frame.len() == bodies.len());
        }
        client.disconnect().unwrap();

        run.join().unwrap().unwrap()
    });

    let mut client = Client::connect(addr, LIMIT).unwrap();
    assert_eq!(client.request_bodies().unwrap(), summary.bodies);
    assert!(client.request_bodies().unwrap().is_empty());
}

#[test]
fn push_mode_streams_frames() {
    let (store, addr) = serve(ServeMode::Push {
        interval: Duration::from_millis(2),
    });
    let (bodies, _) = two_bodies();
    store.publish(&bodies);

    let mut client = Client::connect(addr, LIMIT).unwrap();
    for _ in 0..3 {
        assert_eq!(client.next_frame().unwrap(), bodies);
    }
    client.disconnect().unwrap();

    // A viewer vanishing without a word does not stop the others.
    let mut raw = TcpStream::connect(addr).unwrap();
    raw.write_all(&99u32.to_ne_bytes()).unwrap();
    drop(raw);

    let mut client = Client::connect(addr, LIMIT).unwrap();
    assert_eq!(client.next_frame().unwrap(), bodies);
}

#[test]
fn oversized_frames_are_refused() {
    let (store, addr) = serve(ServeMode::Pull);
    store.publish(&random_cloud(&mut StdRng::seed_from_u64(1), 9));

    let mut client = Client::connect(addr, 8).unwrap();
    assert!(matches!(
        client.request_bodies(),
        Err(gravstream::error::ProtocolError::CountTooLarge { count: 9, limit: 8 })
    ));
}

fn final_state<M: ComputeMethod>(
    ranks: usize,
    make_method: impl Fn(usize) -> Result<M, Error> + Sync,
) -> Vec<Body> {
    let bodies = random_cloud(&mut StdRng::seed_from_u64(1808), 24);
    let schedule = Schedule {
        ranks,
        iterations: 10,
        publish_every: 5,
    };
    let params = Parameters {
        gravitation: 1.0,
        timestep: 1.0,
        softening: 10.0,
    };

    cluster::run(&bodies, params, schedule, &SnapshotStore::new(), make_method)
        .unwrap()
        .bodies
}

macro_rules! matches_single_sequential_rank {
    ($($name: ident => $make: expr),+ $(,)?) => {
        paste::paste! {
            $(
                #[test]
                fn [<$name _matches_single_sequential_rank>]() {
                    let expected = final_state(1, |_| Ok(Sequential));

                    for ranks in [1, 2, 5] {
                        assert_eq!(final_state(ranks, $make), expected, "{ranks} ranks");
                    }
                }
            )+
        }
    };
}

matches_single_sequential_rank! {
    sequential => |_| Ok(Sequential),
}

#[cfg(feature = "parallel")]
matches_single_sequential_rank! {
    parallel => |_| Ok(Parallel::new(2)?),
}

#[cfg(feature = "gpu")]
#[test]
fn device_matches_single_sequential_rank() {
    use gravstream::{error::DeviceError, scenario::CLOUD_EXTENT};

    if let Err(DeviceError::NoAdapter) = DeviceBackend::new() {
        eprintln!("No compute device, skipping");
        return;
    }

    let expected = final_state(1, |_| Ok(Sequential));

    for ranks in [1, 2] {
        let result = final_state(ranks, |_| Ok(DeviceBackend::new()?));
        assert_eq!(result.len(), expected.len());

        // The device computes in single precision.
        for (device, host) in result.iter().zip(&expected) {
            assert!(
                device.position.abs_diff_eq(host.position, CLOUD_EXTENT * 1e-4),
                "{ranks} ranks: {} != {}",
                device.position,
                host.position
            );
        }
    }
}
