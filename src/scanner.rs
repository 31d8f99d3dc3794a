//! Block scanners over a genotype workspace
//!
//! [`BlockScanner::run`] is barrier-synchronized. Thread 0 drives: it waits
//! until every thread finished the previous block, reads the next block into
//! the single shared buffer, reports it through `on_read`, wakes the workers
//! and then processes the block itself. No thread sees block k+1 before all
//! threads returned from block k.
//!
//! [`BlockScanner::run_dynamic`] instead lets every thread pull the next
//! unread block from a [`WorkQueue`] into a buffer of its own.

use crate::config::ScanConfig;
use crate::error::{GdsError, RecordError, Result};
use crate::progress::Progress;
use crate::threads::run_threads;
use crate::workspace::{GenotypeWorkspace, Orientation, ScanAxis};
use parking_lot::{Condvar, Mutex, RwLock};

/// Block handed to the callbacks
#[derive(Debug, Clone, Copy)]
pub struct ScanBlock<'b> {
    /// Index of the first selected position of the block along the axis
    pub start: usize,
    /// Positions in the block
    pub len: usize,
    /// Genotypes in the scanner's read orientation
    pub data: &'b [u8],
}

/// Totals of a finished scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanSummary {
    pub blocks: usize,
    pub positions: usize,
    pub threads: usize,
}

#[derive(Debug, Default)]
struct RoundState {
    round: u64,
    start: usize,
    len: usize,
    /// Threads still working on the current round
    active: usize,
    finished: bool,
    failed: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<RoundState>,
    /// Signalled when a round starts or the scan ends
    round_started: Condvar,
    /// Signalled when `active` drops to zero
    round_done: Condvar,
    buffer: RwLock<Vec<u8>>,
}

impl Shared {
    fn finish_round(&self) {
        let mut state = self.state.lock();
        state.active -= 1;
        if state.active == 0 {
            self.round_done.notify_all();
        }
    }

    fn end_scan(&self, failed: bool) {
        let mut state = self.state.lock();
        state.finished = true;
        state.failed |= failed;
        self.round_started.notify_all();
    }
}

/// Sequential block reader feeding a fixed set of threads
#[derive(Debug)]
pub struct BlockScanner<'w, 'a> {
    workspace: &'w GenotypeWorkspace<'a>,
    axis: ScanAxis,
    orientation: Orientation,
    block_size: usize,
    progress: Option<Mutex<Progress>>,
}

impl<'w, 'a> BlockScanner<'w, 'a> {
    /// Scan `axis` in blocks of `block_size` positions, reading genotypes in
    /// `orientation`
    pub fn new(
        workspace: &'w GenotypeWorkspace<'a>,
        axis: ScanAxis,
        orientation: Orientation,
        block_size: usize,
    ) -> Self {
        Self {
            workspace,
            axis,
            orientation,
            block_size: block_size.max(1),
            progress: None,
        }
    }

    /// Report progress in scanned positions
    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = Some(Mutex::new(progress));
        self
    }

    /// Hand the progress counter back after a scan
    pub fn into_progress(self) -> Option<Progress> {
        self.progress.map(Mutex::into_inner)
    }

    /// Block size taken from `config` for `axis`
    pub fn with_config(
        workspace: &'w GenotypeWorkspace<'a>,
        axis: ScanAxis,
        orientation: Orientation,
        config: &ScanConfig,
    ) -> Self {
        let block_size = match axis {
            ScanAxis::Snp => config.block_snp,
            ScanAxis::Sample => config.block_sample,
        };
        Self::new(workspace, axis, orientation, block_size)
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Genotypes per position of the scanned axis
    fn stride(&self) -> usize {
        match self.axis {
            ScanAxis::Snp => self.workspace.sample_count(),
            ScanAxis::Sample => self.workspace.snp_count(),
        }
    }

    fn start_progress(&self, total: usize) {
        if let Some(progress) = &self.progress {
            progress.lock().init(total as u64);
        }
    }

    fn advance_progress(&self, step: usize) {
        if let Some(progress) = &self.progress {
            progress.lock().forward(step as u64);
        }
    }

    /// Queue handing out the blocks of this scanner one at a time
    pub fn work_queue(&self) -> WorkQueue<'_, 'w, 'a> {
        WorkQueue {
            scanner: self,
            total: self.workspace.axis_count(self.axis),
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Scan every selected position with `n_threads` threads.
    ///
    /// `on_read` runs on thread 0 after each read, before any thread
    /// processes the block; `on_block(thread, block)` runs on every thread
    /// for every block. The first error stops the scan after the current
    /// round and is returned.
    pub fn run<R, W>(&self, n_threads: usize, on_read: R, on_block: W) -> Result<ScanSummary>
    where
        R: FnMut(&ScanBlock<'_>) -> Result<()> + Send,
        W: Fn(usize, &ScanBlock<'_>) -> Result<()> + Sync,
    {
        self.run_inner(n_threads.max(1), on_read, on_block).record_error()
    }

    fn run_inner<R, W>(&self, n_threads: usize, on_read: R, on_block: W) -> Result<ScanSummary>
    where
        R: FnMut(&ScanBlock<'_>) -> Result<()> + Send,
        W: Fn(usize, &ScanBlock<'_>) -> Result<()> + Sync,
    {
        if !self.workspace.is_bound() {
            return Err(GdsError::Unbound);
        }
        let total = self.workspace.axis_count(self.axis);
        tracing::info!(
            axis = ?self.axis,
            positions = total,
            block = self.block_size,
            threads = n_threads,
            "block scan started"
        );
        self.start_progress(total);
        let shared = Shared::default();
        let on_read = Mutex::new(on_read);
        let summary = Mutex::new(ScanSummary {
            threads: n_threads,
            ..ScanSummary::default()
        });

        run_threads(n_threads, |index| {
            if index == 0 {
                let result = self.drive(n_threads, total, &shared, &on_read, &on_block, &summary);
                shared.end_scan(result.is_err());
                result
            } else {
                Self::work(index, &shared, &on_block)
            }
        })?;

        let summary = summary.into_inner();
        tracing::info!(blocks = summary.blocks, positions = summary.positions, "block scan finished");
        Ok(summary)
    }

    fn drive<R, W>(
        &self,
        n_threads: usize,
        total: usize,
        shared: &Shared,
        on_read: &Mutex<R>,
        on_block: &W,
        summary: &Mutex<ScanSummary>,
    ) -> Result<()>
    where
        R: FnMut(&ScanBlock<'_>) -> Result<()> + Send,
        W: Fn(usize, &ScanBlock<'_>) -> Result<()> + Sync,
    {
        let stride = self.stride();
        let mut position = 0usize;
        loop {
            {
                let mut state = shared.state.lock();
                while state.active > 0 {
                    shared.round_done.wait(&mut state);
                }
                if state.failed {
                    return Ok(());
                }
            }

            let count = self.block_size.min(total - position);
            if count == 0 {
                return Ok(());
            }
            {
                let mut buffer = shared.buffer.write();
                buffer.clear();
                buffer.resize(count * stride, 0);
                self.workspace
                    .read_axis(self.axis, position, count, self.orientation, &mut buffer)?;
            }

            let buffer = shared.buffer.read();
            let block = ScanBlock {
                start: position,
                len: count,
                data: &buffer,
            };
            (on_read.lock())(&block)?;
            tracing::debug!(start = position, len = count, "scan block read");

            {
                let mut state = shared.state.lock();
                state.round += 1;
                state.start = position;
                state.len = count;
                state.active = n_threads;
                shared.round_started.notify_all();
            }
            let result = on_block(0, &block);
            drop(buffer);
            shared.finish_round();
            result?;

            {
                let mut summary = summary.lock();
                summary.blocks += 1;
                summary.positions += count;
            }
            self.advance_progress(count);
            position += count;
        }
    }

    /// Scan every selected position with `n_threads` threads pulling blocks
    /// on demand. Blocks finish in no particular order; `on_block(thread,
    /// block)` runs once per block on whichever thread read it. The first
    /// error stops the hand-out of further blocks and is returned.
    pub fn run_dynamic<W>(&self, n_threads: usize, on_block: W) -> Result<ScanSummary>
    where
        W: Fn(usize, &ScanBlock<'_>) -> Result<()> + Sync,
    {
        self.run_dynamic_inner(n_threads.max(1), on_block).record_error()
    }

    fn run_dynamic_inner<W>(&self, n_threads: usize, on_block: W) -> Result<ScanSummary>
    where
        W: Fn(usize, &ScanBlock<'_>) -> Result<()> + Sync,
    {
        if !self.workspace.is_bound() {
            return Err(GdsError::Unbound);
        }
        let queue = self.work_queue();
        tracing::info!(
            axis = ?self.axis,
            positions = queue.total,
            block = self.block_size,
            threads = n_threads,
            "dynamic block scan started"
        );
        self.start_progress(queue.total);
        let summary = Mutex::new(ScanSummary {
            threads: n_threads,
            ..ScanSummary::default()
        });

        run_threads(n_threads, |index| {
            let mut buffer = Vec::new();
            let result: Result<()> = (|| {
                while let Some((start, len)) = queue.require_work(&mut buffer)? {
                    on_block(index, &ScanBlock {
                        start,
                        len,
                        data: &buffer,
                    })?;
                    {
                        let mut summary = summary.lock();
                        summary.blocks += 1;
                        summary.positions += len;
                    }
                    self.advance_progress(len);
                }
                Ok(())
            })();
            if result.is_err() {
                queue.stop();
            }
            result
        })?;

        let summary = summary.into_inner();
        tracing::info!(blocks = summary.blocks, positions = summary.positions, "dynamic block scan finished");
        Ok(summary)
    }

    fn work<W>(index: usize, shared: &Shared, on_block: &W) -> Result<()>
    where
        W: Fn(usize, &ScanBlock<'_>) -> Result<()> + Sync,
    {
        let mut seen = 0u64;
        loop {
            let (start, len) = {
                let mut state = shared.state.lock();
                while state.round == seen && !state.finished {
                    shared.round_started.wait(&mut state);
                }
                if state.round == seen {
                    return Ok(());
                }
                seen = state.round;
                (state.start, state.len)
            };

            let buffer = shared.buffer.read();
            let result = on_block(index, &ScanBlock {
                start,
                len,
                data: &buffer,
            });
            drop(buffer);
            if result.is_err() {
                shared.state.lock().failed = true;
            }
            shared.finish_round();
            result?;
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    next: usize,
    stopped: bool,
}

/// Mutex-guarded cursor over the blocks of a scan
#[derive(Debug)]
pub struct WorkQueue<'s, 'w, 'a> {
    scanner: &'s BlockScanner<'w, 'a>,
    total: usize,
    state: Mutex<QueueState>,
}

impl WorkQueue<'_, '_, '_> {
    /// Read the next unread block into `buffer` and return its `(start,
    /// len)`, or `None` once every position was handed out or the queue
    /// was stopped. Reads are serialized by the queue lock.
    pub fn require_work(&self, buffer: &mut Vec<u8>) -> Result<Option<(usize, usize)>> {
        let mut state = self.state.lock();
        if state.stopped {
            return Ok(None);
        }
        let start = state.next;
        let len = self.scanner.block_size.min(self.total - start);
        if len == 0 {
            return Ok(None);
        }
        buffer.clear();
        buffer.resize(len * self.scanner.stride(), 0);
        let scanner = self.scanner;
        scanner
            .workspace
            .read_axis(scanner.axis, start, len, scanner.orientation, buffer)?;
        state.next += len;
        Ok(Some((start, len)))
    }

    /// Hand out no further blocks
    pub fn stop(&self) {
        self.state.lock().stopped = true;
    }

    /// Positions not handed out yet
    pub fn remaining(&self) -> usize {
        let state = self.state.lock();
        if state.stopped {
            0
        } else {
            self.total - state.next
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::GdsArray;
    use crate::types::ElementKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// 2 samples x 10 SNPs, SNP-major
    fn geno() -> GdsArray {
        let mut array = GdsArray::new(ElementKind::bits(2, false).unwrap(), &[0, 10]).unwrap();
        let values: Vec<u8> = (0..20).map(|k| (k % 3) as u8).collect();
        array.append(&values).unwrap();
        array
    }

    #[test]
    fn test_rounds_run_in_lock_step() {
        let array = geno();
        let mut ws = GenotypeWorkspace::new();
        ws.bind_array(&array, Orientation::SnpMajor).unwrap();
        let scanner = BlockScanner::new(&ws, ScanAxis::Snp, Orientation::SampleMajor, 3);

        const N: usize = 4;
        let pending = AtomicUsize::new(0);
        let finished = AtomicUsize::new(0);
        let rounds = AtomicUsize::new(0);
        let mut reads = Vec::new();
        let seen: Mutex<Vec<Vec<(usize, usize)>>> = Mutex::new(vec![Vec::new(); N]);

        let summary = scanner
            .run(
                N,
                |block| {
                    // every callback of the previous round has returned
                    assert_eq!(pending.load(Ordering::SeqCst), 0);
                    assert_eq!(finished.load(Ordering::SeqCst), rounds.load(Ordering::SeqCst) * N);
                    rounds.fetch_add(1, Ordering::SeqCst);
                    pending.store(N, Ordering::SeqCst);
                    reads.push((block.start, block.len));
                    Ok(())
                },
                |thread, block| {
                    let round = rounds.load(Ordering::SeqCst);
                    assert!(pending.load(Ordering::SeqCst) >= 1);
                    assert_eq!(block.start, (round - 1) * 3);
                    let done = finished.load(Ordering::SeqCst);
                    assert!(done >= (round - 1) * N && done < round * N);
                    assert_eq!(block.data.len(), block.len * 2);
                    // SNP j of sample i sits at data[j * 2 + i]
                    for j in 0..block.len {
                        for i in 0..2 {
                            let k = i * 10 + block.start + j;
                            assert_eq!(block.data[j * 2 + i], (k % 3) as u8);
                        }
                    }
                    seen.lock()[thread].push((block.start, block.len));
                    pending.fetch_sub(1, Ordering::SeqCst);
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            )
            .unwrap();

        let expected = vec![(0, 3), (3, 3), (6, 3), (9, 1)];
        assert_eq!(reads, expected);
        for per_thread in seen.into_inner() {
            assert_eq!(per_thread, expected);
        }
        assert_eq!(finished.load(Ordering::SeqCst), 4 * N);
        assert_eq!(pending.load(Ordering::SeqCst), 0);
        assert_eq!(
            summary,
            ScanSummary {
                blocks: 4,
                positions: 10,
                threads: N
            }
        );
    }

    #[test]
    fn test_dynamic_scan_covers_every_block() {
        let array = geno();
        let mut ws = GenotypeWorkspace::new();
        ws.bind_array(&array, Orientation::SnpMajor).unwrap();
        let percents = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&percents);
        let progress = Progress::new("dynamic")
            .with_interval(Duration::ZERO)
            .with_hook(move |report| sink.lock().push(report.percent));
        let scanner = BlockScanner::new(&ws, ScanAxis::Snp, Orientation::SampleMajor, 3)
            .with_progress(progress);

        let blocks = Mutex::new(Vec::new());
        let summary = scanner
            .run_dynamic(3, |_, block| {
                assert_eq!(block.data.len(), block.len * 2);
                for j in 0..block.len {
                    for i in 0..2 {
                        let k = i * 10 + block.start + j;
                        assert_eq!(block.data[j * 2 + i], (k % 3) as u8);
                    }
                }
                blocks.lock().push((block.start, block.len));
                Ok(())
            })
            .unwrap();

        let mut blocks = blocks.into_inner();
        blocks.sort_unstable();
        assert_eq!(blocks, vec![(0, 3), (3, 3), (6, 3), (9, 1)]);
        assert_eq!(
            summary,
            ScanSummary {
                blocks: 4,
                positions: 10,
                threads: 3
            }
        );
        let progress = scanner.into_progress().unwrap();
        assert_eq!((progress.current(), progress.total()), (10, 10));
        assert_eq!(percents.lock().last(), Some(&100));
    }

    #[test]
    fn test_work_queue_hands_out_blocks_once() {
        let array = geno();
        let mut ws = GenotypeWorkspace::new();
        ws.bind_array(&array, Orientation::SnpMajor).unwrap();
        let scanner = BlockScanner::new(&ws, ScanAxis::Sample, Orientation::SnpMajor, 1);
        let queue = scanner.work_queue();

        let mut buffer = Vec::new();
        assert_eq!(queue.require_work(&mut buffer).unwrap(), Some((0, 1)));
        assert_eq!(buffer, (0..10).map(|k| (k % 3) as u8).collect::<Vec<_>>());
        assert_eq!(queue.remaining(), 1);
        queue.stop();
        assert_eq!(queue.remaining(), 0);
        assert_eq!(queue.require_work(&mut buffer).unwrap(), None);
    }

    #[test]
    fn test_dynamic_error_stops_hand_out() {
        let array = geno();
        let mut ws = GenotypeWorkspace::new();
        ws.bind_array(&array, Orientation::SnpMajor).unwrap();
        let scanner = BlockScanner::new(&ws, ScanAxis::Snp, Orientation::SnpMajor, 2);

        let calls = AtomicUsize::new(0);
        let err = scanner
            .run_dynamic(1, |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(GdsError::Configuration("stop here".into()))
            })
            .unwrap_err();
        assert!(err.to_string().contains("stop here"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sample_axis_with_selection() {
        let array = geno();
        let mut ws = GenotypeWorkspace::new();
        ws.bind_array(&array, Orientation::SnpMajor).unwrap();
        let mut snp_mask = vec![false; 10];
        snp_mask[4] = true;
        snp_mask[7] = true;
        ws.set_snp_selection(&snp_mask).unwrap();

        let scanner = BlockScanner::with_config(
            &ws,
            ScanAxis::Sample,
            Orientation::SnpMajor,
            &ScanConfig::default(),
        );
        let data = Mutex::new(Vec::new());
        scanner
            .run(2, |_| Ok(()), |thread, block| {
                if thread == 1 {
                    data.lock().extend_from_slice(block.data);
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(data.into_inner(), vec![4 % 3, 7 % 3, 14 % 3, 17 % 3]);
    }

    #[test]
    fn test_error_aborts_scan() {
        let array = geno();
        let mut ws = GenotypeWorkspace::new();
        ws.bind_array(&array, Orientation::SnpMajor).unwrap();
        let scanner = BlockScanner::new(&ws, ScanAxis::Snp, Orientation::SnpMajor, 3);

        let mut reads = 0;
        let err = scanner
            .run(
                3,
                |_| {
                    reads += 1;
                    Ok(())
                },
                |thread, block| {
                    if thread == 2 && block.start == 3 {
                        return Err(GdsError::Configuration("worker failed".into()));
                    }
                    Ok(())
                },
            )
            .unwrap_err();
        assert!(err.to_string().contains("worker failed"));
        assert_eq!(reads, 2);
    }

    #[test]
    fn test_unbound_workspace() {
        let ws = GenotypeWorkspace::new();
        let scanner = BlockScanner::new(&ws, ScanAxis::Snp, Orientation::SnpMajor, 8);
        assert!(matches!(
            scanner.run(2, |_| Ok(()), |_, _| Ok(())),
            Err(GdsError::Unbound)
        ));
    }
}
