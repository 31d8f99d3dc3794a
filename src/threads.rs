//! Threading primitives: suspend/wake, scoped thread runs and static job
//! partitions

use crate::error::{GdsError, Result};
use parking_lot::{Condvar, Mutex};

/// Broadcast wake-up point.
///
/// Waiters block until a [`wake_all`](Self::wake_all) issued after the
/// epoch they observed; a wake that happened before is never lost.
#[derive(Debug, Default)]
pub struct Suspend {
    epoch: Mutex<u64>,
    cond: Condvar,
}

impl Suspend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current wake-up generation
    pub fn epoch(&self) -> u64 {
        *self.epoch.lock()
    }

    /// Block until the next wake-up
    pub fn suspend(&self) {
        let epoch = self.epoch();
        self.wait_past(epoch);
    }

    /// Block until a wake-up later than `epoch` has happened
    pub fn wait_past(&self, epoch: u64) {
        let mut current = self.epoch.lock();
        while *current <= epoch {
            self.cond.wait(&mut current);
        }
    }

    /// Wake every waiter
    pub fn wake_all(&self) {
        *self.epoch.lock() += 1;
        self.cond.notify_all();
    }
}

/// Run `f(0..n)` on `n` threads, index 0 on the calling thread.
///
/// Every thread runs to completion; the first error reported wins.
pub fn run_threads<F>(n: usize, f: F) -> Result<()>
where
    F: Fn(usize) -> Result<()> + Sync,
{
    let n = n.max(1);
    let first_error: Mutex<Option<GdsError>> = Mutex::new(None);
    let record = |result: Result<()>| {
        if let Err(err) = result {
            first_error.lock().get_or_insert(err);
        }
    };
    std::thread::scope(|scope| {
        for index in 1..n {
            let (f, record) = (&f, &record);
            scope.spawn(move || record(f(index)));
        }
        record(f(0));
    });
    tracing::debug!(threads = n, "thread run finished");
    match first_error.into_inner() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Position in the upper triangle of a `size x size` matrix, walked row
/// by row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriangleIndex {
    size: usize,
    include_diagonal: bool,
    row: usize,
    col: usize,
    offset: u64,
}

impl TriangleIndex {
    /// First cell: `(0, 0)`, or `(0, 1)` without the diagonal
    pub fn new(size: usize, include_diagonal: bool) -> Self {
        let mut index = Self {
            size,
            include_diagonal,
            row: 0,
            col: if include_diagonal { 0 } else { 1 },
            offset: 0,
        };
        index.skip_empty_rows();
        index
    }

    /// Cells in the triangle
    pub fn cell_count(size: usize, include_diagonal: bool) -> u64 {
        let n = size as u64;
        if include_diagonal {
            n * (n + 1) / 2
        } else {
            n * n.saturating_sub(1) / 2
        }
    }

    pub fn row(&self) -> usize {
        self.row
    }

    pub fn col(&self) -> usize {
        self.col
    }

    /// Cells before this one
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn is_end(&self) -> bool {
        self.offset >= Self::cell_count(self.size, self.include_diagonal)
    }

    fn first_col(&self, row: usize) -> usize {
        if self.include_diagonal {
            row
        } else {
            row + 1
        }
    }

    fn skip_empty_rows(&mut self) {
        while self.row < self.size && self.col >= self.size {
            self.row += 1;
            self.col = self.first_col(self.row);
        }
    }

    /// Move forward `n` cells, stopping at the end of the triangle
    pub fn advance(&mut self, mut n: u64) {
        let total = Self::cell_count(self.size, self.include_diagonal);
        n = n.min(total - self.offset.min(total));
        self.offset += n;
        while n > 0 {
            let left = (self.size - self.col) as u64;
            if n < left {
                self.col += n as usize;
                return;
            }
            n -= left;
            self.row += 1;
            self.col = self.first_col(self.row);
            self.skip_empty_rows();
        }
    }

    /// The next `count` cells as `(row, col)`
    pub fn cells(mut self, count: u64) -> impl Iterator<Item = (usize, usize)> {
        (0..count).map_while(move |_| {
            if self.is_end() {
                return None;
            }
            let cell = (self.row, self.col);
            self.advance(1);
            Some(cell)
        })
    }
}

/// Contiguous share of the triangle given to one job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriangleJob {
    pub start: TriangleIndex,
    pub count: u64,
}

/// Split the triangle of a `size x size` matrix into `n_jobs` contiguous
/// shares of near-equal cell counts
pub fn split_triangle(n_jobs: usize, size: usize, include_diagonal: bool) -> Vec<TriangleJob> {
    let n_jobs = n_jobs.max(1);
    let ratio = TriangleIndex::cell_count(size, include_diagonal) as f64 / n_jobs as f64;
    let mut jobs = Vec::with_capacity(n_jobs);
    let mut cursor = TriangleIndex::new(size, include_diagonal);
    let mut acc = 0.0;
    let mut done = 0u64;
    for _ in 0..n_jobs {
        acc += ratio;
        let end = (acc + 0.5) as u64;
        let count = end - done;
        jobs.push(TriangleJob {
            start: cursor,
            count,
        });
        cursor.advance(count);
        done = end;
    }
    jobs
}
