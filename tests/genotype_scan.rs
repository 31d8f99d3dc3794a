//! Genotype workspace and block scanner over a file-backed genotype matrix

use anyhow::Result;
use gdsarray::threads::{run_threads, split_triangle};
use gdsarray::{
    AttrValue, BlockScanner, ElementKind, GdsFile, GenotypeWorkspace, OpenOptions, Orientation,
    ScanAxis, ScanConfig,
};
use parking_lot::Mutex;
use std::path::Path;

const SAMPLES: usize = 6;
const SNPS: usize = 20;

fn genotype(sample: usize, snp: usize) -> u8 {
    ((sample * 7 + snp * 3) % 4) as u8
}

/// Sample-major storage: `[snp][sample]`
fn build(path: &Path) -> Result<()> {
    let mut file = GdsFile::create(path)?;
    let node = file.root_mut().folder_mut()?.add_array(
        "genotype",
        ElementKind::bits(2, false)?,
        &[0, SAMPLES as u64],
        "ZIP.fast",
    )?;
    node.attrs_mut().set("sample.order", AttrValue::Null)?;
    let array = node.array_mut()?;
    for snp in 0..SNPS {
        let row: Vec<u8> = (0..SAMPLES).map(|s| genotype(s, snp)).collect();
        array.append(&row)?;
    }
    file.close()?;
    Ok(())
}

#[test]
fn test_snp_scan_allele_counts() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("geno.gds");
    build(&path)?;

    let file = GdsFile::open(&path, OpenOptions::read_only())?;
    let mut ws = GenotypeWorkspace::from_node(file.resolve("genotype")?)?;
    assert_eq!(ws.orientation()?, Orientation::SampleMajor);
    assert_eq!((ws.total_sample_count(), ws.total_snp_count()), (SAMPLES, SNPS));

    let sample_mask = [true, false, true, true, false, true];
    ws.set_sample_selection(&sample_mask)?;
    let kept: Vec<usize> = ws.sample_index().to_vec();
    assert_eq!(kept, vec![0, 2, 3, 5]);

    // every thread sums its own share of samples for each SNP of the block
    const THREADS: usize = 3;
    let sums = Mutex::new(vec![0u32; SNPS]);
    let scanner = BlockScanner::new(&ws, ScanAxis::Snp, Orientation::SampleMajor, 7);
    let summary = scanner.run(THREADS, |_| Ok(()), |thread, block| {
        let n = kept.len();
        let mut local = vec![0u32; block.len];
        for (j, total) in local.iter_mut().enumerate() {
            for i in (thread..n).step_by(THREADS) {
                *total += block.data[j * n + i] as u32;
            }
        }
        let mut sums = sums.lock();
        for (j, v) in local.into_iter().enumerate() {
            sums[block.start + j] += v;
        }
        Ok(())
    })?;
    assert_eq!(summary.blocks, 3);
    assert_eq!(summary.positions, SNPS);

    let expected: Vec<u32> = (0..SNPS)
        .map(|snp| kept.iter().map(|&s| genotype(s, snp) as u32).sum())
        .collect();
    assert_eq!(sums.into_inner(), expected);
    Ok(())
}

#[test]
fn test_sample_scan_matches_block_reads() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("geno.gds");
    build(&path)?;

    let file = GdsFile::open(&path, OpenOptions::read_only())?;
    let mut ws = GenotypeWorkspace::from_node(file.resolve("genotype")?)?;
    ws.extract_snps(5, 10)?;
    assert_eq!(ws.snp_count(), 10);

    let config = ScanConfig {
        block_snp: 256,
        block_sample: 4,
    };
    let rows = Mutex::new(Vec::new());
    BlockScanner::with_config(&ws, ScanAxis::Sample, Orientation::SnpMajor, &config).run(
        2,
        |block| {
            rows.lock().push(block.data.to_vec());
            Ok(())
        },
        |_, _| Ok(()),
    )?;
    let rows = rows.into_inner();
    assert_eq!(rows.len(), 2);

    let first = ws.sample_block(0, 4, Orientation::SnpMajor)?;
    assert_eq!(first.shape(), &[4, 10]);
    assert_eq!(first.iter().copied().collect::<Vec<u8>>(), rows[0]);
    for (i, row) in first.outer_iter().enumerate() {
        for (j, &g) in row.iter().enumerate() {
            assert_eq!(g, genotype(i, j + 5));
        }
    }
    Ok(())
}

#[test]
fn test_pairwise_work_split() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("geno.gds");
    build(&path)?;

    let file = GdsFile::open(&path, OpenOptions::read_only())?;
    let ws = GenotypeWorkspace::from_node(file.resolve("genotype")?)?;
    let matrix = ws.snp_block(0, SNPS, Orientation::SampleMajor)?;

    // identical-genotype counts for every sample pair, diagonal included
    let jobs = split_triangle(4, SAMPLES, true);
    let shared = Mutex::new(vec![0u32; SAMPLES * SAMPLES]);
    run_threads(jobs.len(), |index| {
        let job = jobs[index];
        for (a, b) in job.start.cells(job.count) {
            let same = matrix
                .outer_iter()
                .filter(|snp| snp[a] == snp[b])
                .count() as u32;
            shared.lock()[a * SAMPLES + b] = same;
        }
        Ok(())
    })?;

    let shared = shared.into_inner();
    for a in 0..SAMPLES {
        assert_eq!(shared[a * SAMPLES + a], SNPS as u32);
        for b in a..SAMPLES {
            let expected = (0..SNPS)
                .filter(|&snp| genotype(a, snp) == genotype(b, snp))
                .count() as u32;
            assert_eq!(shared[a * SAMPLES + b], expected);
        }
    }
    Ok(())
}
