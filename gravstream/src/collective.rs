use std::{ops::Range, sync::Arc};

use crate::error::SyncError;

/// Collective synchronisation between the workers of a simulation.
///
/// Every worker (rank) owns a range of a shared buffer. [`all_gather`](Collective::all_gather)
/// sends each rank's owned range to every other rank so that, on return, the buffer is identical
/// on all of them. It is a blocking operation that every rank must call the same number of times
/// with the same ranges: a rank skipping a call desynchronises the whole cluster.
pub trait Collective {
    /// Returns the rank of this worker.
    fn rank(&self) -> usize;

    /// Returns the number of workers.
    fn size(&self) -> usize;

    /// Contributes `buffer[ranges[self.rank()]]` and receives the range of every other rank.
    fn all_gather(&mut self, buffer: &mut [u8], ranges: &[Range<usize>]) -> Result<(), SyncError>;
}

impl<C: Collective + ?Sized> Collective for &mut C {
    #[inline]
    fn rank(&self) -> usize {
        (**self).rank()
    }

    #[inline]
    fn size(&self) -> usize {
        (**self).size()
    }

    #[inline]
    fn all_gather(&mut self, buffer: &mut [u8], ranges: &[Range<usize>]) -> Result<(), SyncError> {
        (**self).all_gather(buffer, ranges)
    }
}

fn check_ranges(size: usize, len: usize, ranges: &[Range<usize>]) -> Result<(), SyncError> {
    if ranges.len() != size {
        return Err(SyncError::RangeCount {
            expected: size,
            found: ranges.len(),
        });
    }

    match ranges.iter().find(|r| r.start > r.end || r.end > len) {
        Some(range) => Err(SyncError::OutOfBounds {
            start: range.start,
            end: range.end,
            len,
        }),
        None => Ok(()),
    }
}

/// [`Collective`] of a single worker. Gathering is a no-op.
#[derive(Clone, Copy, Debug, Default)]
pub struct Solo;

impl Collective for Solo {
    #[inline]
    fn rank(&self) -> usize {
        0
    }

    #[inline]
    fn size(&self) -> usize {
        1
    }

    #[inline]
    fn all_gather(&mut self, buffer: &mut [u8], ranges: &[Range<usize>]) -> Result<(), SyncError> {
        check_ranges(1, buffer.len(), ranges)
    }
}

/// In-process cluster of workers, each expected to run on its own thread.
///
/// Ranks are connected by a full mesh of channels, one per ordered pair of ranks, so the
/// contributions of a rank are always received in the order they were sent. When a rank is
/// dropped, its peers fail with [`SyncError::PeerLost`] instead of waiting forever.
pub struct LocalCluster;

impl LocalCluster {
    /// Creates the ranks of a cluster of `size` workers, in rank order.
    pub fn new(size: usize) -> Vec<LocalRank> {
        let mut senders: Vec<Vec<_>> = (0..size).map(|_| vec![None; size]).collect();
        let mut receivers: Vec<Vec<_>> = (0..size).map(|_| vec![None; size]).collect();

        for from in 0..size {
            for to in (0..size).filter(|&to| to != from) {
                let (sender, receiver) = flume::unbounded();
                senders[from][to] = Some(sender);
                receivers[to][from] = Some(receiver);
            }
        }

        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (senders, receivers))| LocalRank {
                rank,
                senders,
                receivers,
            })
            .collect()
    }
}

/// One worker of a [`LocalCluster`].
#[derive(Debug)]
pub struct LocalRank {
    rank: usize,
    senders: Vec<Option<flume::Sender<Arc<[u8]>>>>,
    receivers: Vec<Option<flume::Receiver<Arc<[u8]>>>>,
}

impl Collective for LocalRank {
    #[inline]
    fn rank(&self) -> usize {
        self.rank
    }

    #[inline]
    fn size(&self) -> usize {
        self.senders.len()
    }

    fn all_gather(&mut self, buffer: &mut [u8], ranges: &[Range<usize>]) -> Result<(), SyncError> {
        check_ranges(self.size(), buffer.len(), ranges)?;

        let rank = self.rank;
        let contribution: Arc<[u8]> = Arc::from(&buffer[ranges[rank].clone()]);

        // Channels are unbounded, sending never waits for the peers.
        for (peer, sender) in self.senders.iter().enumerate() {
            if let Some(sender) = sender {
                sender
                    .send(contribution.clone())
                    .map_err(|_| SyncError::PeerLost { rank, peer })?;
            }
        }

        for (peer, receiver) in self.receivers.iter().enumerate() {
            let Some(receiver) = receiver else {
                continue;
            };

            let data = receiver
                .recv()
                .map_err(|_| SyncError::PeerLost { rank, peer })?;

            let range = ranges[peer].clone();
            if data.len() != range.len() {
                return Err(SyncError::ContributionSize {
                    peer,
                    expected: range.len(),
                    found: data.len(),
                });
            }

            buffer[range].copy_from_slice(&data);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solo_leaves_buffer_unchanged() {
        let mut buffer: Vec<u8> = (0..32).collect();
        let expected = buffer.clone();

        Solo.all_gather(&mut buffer, &[0..32]).unwrap();
        assert_eq!(buffer, expected);

        assert!(matches!(
            Solo.all_gather(&mut buffer, &[0..16, 16..32]),
            Err(SyncError::RangeCount { expected: 1, found: 2 })
        ));
    }

    #[test]
    fn local_cluster_gathers_every_range() {
        let ranges = [0..3, 3..6, 6..8, 8..8];
        let ranks = LocalCluster::new(ranges.len());

        let buffers: Vec<Vec<u8>> = std::thread::scope(|scope| {
            let handles: Vec<_> = ranks
                .into_iter()
                .map(|mut rank| {
                    let ranges = &ranges;
                    scope.spawn(move || {
                        let mut buffer = vec![0; 8];

                        // Two rounds to check that consecutive gathers do not interleave.
                        for round in 1..=2u8 {
                            let own = ranges[rank.rank()].clone();
                            buffer[own].fill(rank.rank() as u8 * 10 + round);
                            rank.all_gather(&mut buffer, ranges).unwrap();
                        }

                        buffer
                    })
                })
                .collect();

            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for buffer in buffers {
            assert_eq!(buffer, [2, 2, 2, 12, 12, 12, 22, 22]);
        }
    }

    #[test]
    fn lost_peer_is_an_error() {
        let mut ranks = LocalCluster::new(2);
        let mut first = ranks.remove(0);
        drop(ranks);

        let mut buffer = vec![0; 4];
        assert!(matches!(
            first.all_gather(&mut buffer, &[0..2, 2..4]),
            Err(SyncError::PeerLost { rank: 0, peer: 1 })
        ));
    }

    #[test]
    fn out_of_bounds_range() {
        let mut ranks = LocalCluster::new(2);
        let mut buffer = vec![0; 4];

        assert!(matches!(
            ranks[0].all_gather(&mut buffer, &[0..2, 2..5]),
            Err(SyncError::OutOfBounds { start: 2, end: 5, len: 4 })
        ));
    }
}
