// Ordered buffer of points awaiting delivery
use super::position::QueuedPoint;
use std::collections::VecDeque;

#[derive(Debug, Clone, Default)]
pub struct PointQueue {
    points: VecDeque<QueuedPoint>,
}

impl PointQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, point: QueuedPoint) {
        self.points.push_back(point);
    }

    /// Remove and return up to `max` points from the front
    pub fn take_batch(&mut self, max: usize) -> Vec<QueuedPoint> {
        let n = max.min(self.points.len());
        self.points.drain(..n).collect()
    }

    /// Put a previously taken batch back ahead of everything enqueued since
    pub fn requeue_front(&mut self, batch: Vec<QueuedPoint>) {
        for point in batch.into_iter().rev() {
            self.points.push_front(point);
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}
