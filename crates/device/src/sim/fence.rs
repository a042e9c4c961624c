//! Descriptor table and software fence timelines
//!
//! Timelines count up from 0. A sync file descriptor refers to a point on a
//! timeline and signals once the timeline reaches it. Descriptors and the
//! points they refer to are independent: closing a fence descriptor does not
//! affect a commit that already captured its point. Closing a timeline
//! releases it, which signals everything still pending on it.

use kmsprobe_core::{KmsError, KmsResult};
use std::collections::BTreeMap;

/// Lowest descriptor number handed out
const FIRST_FD: i32 = 3;

/// Point a fence waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FencePoint {
    /// Already signaled when created
    Signaled,
    /// Signals when `timeline` reaches `seq`
    Pending { timeline: u32, seq: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FdEntry {
    Timeline(u32),
    SyncFile(FencePoint),
}

#[derive(Debug, Default)]
pub(crate) struct FenceTable {
    fds: BTreeMap<i32, FdEntry>,
    timelines: BTreeMap<u32, u32>,
    next_timeline: u32,
}

impl FenceTable {
    fn alloc_fd(&mut self, entry: FdEntry) -> i32 {
        let mut fd = FIRST_FD;
        while self.fds.contains_key(&fd) {
            fd += 1;
        }
        self.fds.insert(fd, entry);
        fd
    }

    pub(crate) fn create_timeline(&mut self) -> i32 {
        self.next_timeline += 1;
        let id = self.next_timeline;
        self.timelines.insert(id, 0);
        self.alloc_fd(FdEntry::Timeline(id))
    }

    pub(crate) fn create_fence(&mut self, timeline_fd: i32, seq: u32) -> KmsResult<i32> {
        match self.fds.get(&timeline_fd) {
            Some(FdEntry::Timeline(id)) => {
                let point = FencePoint::Pending { timeline: *id, seq };
                Ok(self.alloc_fd(FdEntry::SyncFile(point)))
            }
            Some(FdEntry::SyncFile(_)) => Err(KmsError::InvalidArgument),
            None => Err(KmsError::BadDescriptor),
        }
    }

    pub(crate) fn signaled_fence(&mut self) -> i32 {
        self.alloc_fd(FdEntry::SyncFile(FencePoint::Signaled))
    }

    pub(crate) fn signal(&mut self, timeline_fd: i32, inc: u32) -> KmsResult<()> {
        let id = match self.fds.get(&timeline_fd) {
            Some(FdEntry::Timeline(id)) => *id,
            Some(FdEntry::SyncFile(_)) => return Err(KmsError::InvalidArgument),
            None => return Err(KmsError::BadDescriptor),
        };
        let value = self.timelines.entry(id).or_insert(0);
        *value = value.saturating_add(inc);
        Ok(())
    }

    /// Fence point behind a sync file descriptor
    pub(crate) fn sync_point(&self, fd: i32) -> Option<FencePoint> {
        match self.fds.get(&fd) {
            Some(FdEntry::SyncFile(point)) => Some(*point),
            _ => None,
        }
    }

    pub(crate) fn is_signaled(&self, point: FencePoint) -> bool {
        match point {
            FencePoint::Signaled => true,
            FencePoint::Pending { timeline, seq } => self
                .timelines
                .get(&timeline)
                .map_or(true, |value| *value >= seq),
        }
    }

    pub(crate) fn fence_status(&self, fd: i32) -> KmsResult<bool> {
        match self.fds.get(&fd) {
            Some(FdEntry::SyncFile(point)) => Ok(self.is_signaled(*point)),
            Some(FdEntry::Timeline(_)) => Err(KmsError::InvalidArgument),
            None => Err(KmsError::BadDescriptor),
        }
    }

    pub(crate) fn close(&mut self, fd: i32) -> KmsResult<()> {
        match self.fds.remove(&fd) {
            Some(FdEntry::Timeline(id)) => {
                // ids are never reused; points on a missing timeline read as signaled
                self.timelines.remove(&id);
                Ok(())
            }
            Some(FdEntry::SyncFile(_)) => Ok(()),
            None => Err(KmsError::BadDescriptor),
        }
    }

    pub(crate) fn open_count(&self) -> usize {
        self.fds.len()
    }

    #[cfg(test)]
    pub(crate) fn timeline_count(&self) -> usize {
        self.timelines.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fence_signals_when_timeline_reaches_seq() {
        let mut table = FenceTable::default();
        let tl = table.create_timeline();
        let fence = table.create_fence(tl, 2).unwrap();
        let point = table.sync_point(fence).unwrap();
        assert!(!table.is_signaled(point));
        table.signal(tl, 1).unwrap();
        assert!(!table.is_signaled(point));
        table.signal(tl, 1).unwrap();
        assert!(table.is_signaled(point));
    }

    #[test]
    fn test_timeline_is_not_a_sync_file() {
        let mut table = FenceTable::default();
        let tl = table.create_timeline();
        assert_eq!(table.sync_point(tl), None);
        assert_eq!(table.fence_status(tl), Err(KmsError::InvalidArgument));
    }

    #[test]
    fn test_point_outlives_descriptor() {
        let mut table = FenceTable::default();
        let tl = table.create_timeline();
        let fence = table.create_fence(tl, 1).unwrap();
        let point = table.sync_point(fence).unwrap();
        table.close(fence).unwrap();
        assert_eq!(table.close(fence), Err(KmsError::BadDescriptor));
        assert!(!table.is_signaled(point));
        table.close(tl).unwrap();
        assert!(table.is_signaled(point));
        assert_eq!(table.open_count(), 0);
    }

    #[test]
    fn test_closed_timelines_are_forgotten() {
        let mut table = FenceTable::default();
        let mut points = Vec::new();
        for _ in 0..8 {
            let tl = table.create_timeline();
            let fence = table.create_fence(tl, 5).unwrap();
            points.push(table.sync_point(fence).unwrap());
            table.close(fence).unwrap();
            table.close(tl).unwrap();
        }
        assert_eq!(table.timeline_count(), 0);
        assert_eq!(table.open_count(), 0);
        assert!(points.into_iter().all(|p| table.is_signaled(p)));

        let tl = table.create_timeline();
        let fence = table.create_fence(tl, 1).unwrap();
        let point = table.sync_point(fence).unwrap();
        assert_eq!(table.timeline_count(), 1);
        assert!(!table.is_signaled(point));
        table.close(tl).unwrap();
        assert_eq!(table.timeline_count(), 0);
        assert!(table.is_signaled(point));
        assert_eq!(table.fence_status(fence), Ok(true));
    }

    #[test]
    fn test_descriptors_are_reused_lowest_first() {
        let mut table = FenceTable::default();
        let a = table.signaled_fence();
        let b = table.signaled_fence();
        assert_eq!(b, a + 1);
        table.close(a).unwrap();
        assert_eq!(table.signaled_fence(), a);
    }
}
