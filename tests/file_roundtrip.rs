//! File lifecycle tests: build a tree, close, reopen and read it back

use anyhow::Result;
use gdsarray::{
    AttrValue, CompressionSpec, ElementKind, GdsError, GdsFile, LoadMode, MemoryStorage, OpenOptions,
    StrEncoding,
};
use std::path::Path;

fn build(path: &Path) -> Result<()> {
    let mut file = GdsFile::create(path)?;
    let root = file.root_mut().folder_mut()?;

    root.add_label("description")?
        .attrs_mut()
        .set("source", "unit test")?;

    let ids = root.add_array("sample.id", ElementKind::fixed_str(StrEncoding::Utf8, 0), &[0], "")?;
    ids.array_mut()?.append_strings(&["NA001", "NA002", "NA00003"])?;

    let annot = root.add_folder("snp.annot")?.folder_mut()?;
    let pos = annot.add_array("position", ElementKind::Int32, &[0], "ZSTD")?;
    pos.array_mut()?.append(&[101i32, 250, 1024, 4096])?;

    let geno = root.add_array("genotype", ElementKind::bits(2, false)?, &[0, 4], "ZIP")?;
    geno.attrs_mut().set("snp.order", AttrValue::Null)?;
    // 3 samples x 4 SNPs
    geno.array_mut()?
        .append(&[0u8, 1, 2, 3, 1, 1, 0, 0, 2, 2, 3, 1])?;

    file.close()?;
    Ok(())
}

#[test]
fn test_tree_survives_reopen() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("tree.gds");
    build(&path)?;

    let file = GdsFile::open(&path, OpenOptions::read_only())?;
    assert!(file.is_read_only());

    let names: Vec<&str> = file.root().folder()?.children().map(|n| n.name()).collect();
    assert_eq!(names, vec!["description", "sample.id", "snp.annot", "genotype"]);

    let label = file.resolve("description")?;
    assert_eq!(label.attrs().get("source"), Some(&AttrValue::Str("unit test".into())));

    let ids = file.resolve("sample.id")?.array()?;
    assert_eq!(ids.read_strings(&[0], &[3], None)?, vec!["NA001", "NA002", "NA00003"]);

    let pos = file.resolve("snp.annot/position")?.array()?;
    assert_eq!(pos.read_all::<i32>()?, vec![101, 250, 1024, 4096]);
    assert_eq!(pos.read::<i64>(&[1], &[2], None)?, vec![250, 1024]);

    let geno = file.resolve("genotype")?;
    assert!(geno.attrs().contains("snp.order"));
    let geno = geno.array()?;
    assert_eq!(geno.dims(), vec![3, 4]);
    let mask_rows = [true, false, true];
    let mask_cols = [false, true, true, false];
    let picked: Vec<u8> = geno.read(
        &[0, 0],
        &[3, 4],
        Some(&[Some(&mask_rows[..]), Some(&mask_cols[..])]),
    )?;
    assert_eq!(picked, vec![1, 2, 2, 3]);
    Ok(())
}

#[test]
fn test_read_only_rejects_changes() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("ro.gds");
    build(&path)?;

    let mut file = GdsFile::open(&path, OpenOptions::read_only())?;
    let root = file.root_mut().folder_mut()?;
    assert!(matches!(
        root.add_folder("extra"),
        Err(GdsError::ReadOnlyViolation(_))
    ));
    let pos = file.resolve_mut("snp.annot/position")?.array_mut()?;
    assert!(pos.append(&[1i32]).is_err());
    Ok(())
}

#[test]
fn test_read_only_attributes_reject_edits() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("attrs.gds");
    build(&path)?;

    {
        let mut file = GdsFile::open(&path, OpenOptions::read_only())?;
        let label = file.resolve_mut("description")?;
        assert!(label.attrs().is_read_only());
        assert!(matches!(
            label.attrs_mut().set("source", "changed"),
            Err(GdsError::ReadOnlyViolation(_))
        ));
        assert!(matches!(
            file.root_mut().attrs_mut().remove("missing"),
            Err(GdsError::ReadOnlyViolation(_))
        ));
        file.close()?;
    }

    // a writable reopen keeps the original value and accepts edits
    let mut file = GdsFile::open(&path, OpenOptions::default())?;
    let label = file.resolve_mut("description")?;
    assert_eq!(label.attrs().get("source"), Some(&AttrValue::Str("unit test".into())));
    label.attrs_mut().set("source", "changed")?;
    file.close()?;

    let file = GdsFile::open(&path, OpenOptions::read_only())?;
    assert_eq!(
        file.resolve("description")?.attrs().get("source"),
        Some(&AttrValue::Str("changed".into()))
    );
    Ok(())
}

#[test]
fn test_load_mode_switch() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("modes.gds");
    build(&path)?;

    let mut file = GdsFile::open(&path, OpenOptions::read_only())?;
    let geno = file.resolve_mut("genotype")?.array_mut()?;
    let streamed: Vec<u8> = geno.read_all()?;
    geno.set_load_mode(LoadMode::InMemory)?;
    assert_eq!(geno.load_mode(), LoadMode::InMemory);
    assert_eq!(geno.read_all::<u8>()?, streamed);
    geno.set_load_mode(LoadMode::Streamed)?;
    assert_eq!(geno.read_all::<u8>()?, streamed);
    Ok(())
}

#[test]
fn test_random_writes_after_reopen() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("rw.gds");
    {
        let mut file = GdsFile::create(&path)?;
        let root = file.root_mut().folder_mut()?;
        root.add_array("dosage", ElementKind::Float64, &[2, 3], "")?;
        file.close()?;
    }
    {
        let mut file = GdsFile::open(&path, OpenOptions::default())?;
        let dosage = file.resolve_mut("dosage")?.array_mut()?;
        dosage.write_data(&[1, 0], &[1, 3], &[0.5f64, 1.0, 1.5])?;
        dosage.write(&[2, 1], &[1, 2], &[2.0f64, 2.5])?;
        file.close()?;
    }
    let file = GdsFile::open(&path, OpenOptions::read_only())?;
    let dosage = file.resolve("dosage")?.array()?;
    assert_eq!(dosage.dims(), vec![3, 3]);
    assert_eq!(
        dosage.read_all::<f64>()?,
        vec![0.0, 0.0, 0.0, 0.5, 1.0, 1.5, 0.0, 2.0, 2.5]
    );
    Ok(())
}

#[test]
fn test_rejects_foreign_bytes() {
    let storage = MemoryStorage::from_vec(b"definitely not a GDS file, just some bytes".to_vec());
    let result = GdsFile::open_storage(Box::new(storage), OpenOptions::default(), None);
    assert!(matches!(result, Err(GdsError::CorruptStream(_))));
}

#[test]
fn test_fork_reader_sees_synced_state() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("fork.gds");
    let mut file = GdsFile::create_with_options(&path, OpenOptions::default().with_allow_fork(true))?;
    file.root_mut()
        .folder_mut()?
        .add_array("count", ElementKind::UInt16, &[0], "")?
        .array_mut()?
        .append(&[3u16, 5, 8])?;
    file.sync()?;

    let fork = file.fork_reader()?;
    assert!(fork.is_read_only());
    assert_eq!(fork.resolve("count")?.array()?.read_all::<u16>()?, vec![3, 5, 8]);
    file.close()?;
    Ok(())
}

#[test]
fn test_restructure_survives_reopen() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("restructure.gds");
    build(&path)?;

    {
        let mut file = GdsFile::open(&path, OpenOptions::default())?;
        let root = file.root_mut().folder_mut()?;
        root.move_node("snp.annot/position", "position")?;
        root.copy_node("genotype", "snp.annot/genotype.copy")?;

        let pos = file.resolve_mut("position")?.array_mut()?;
        pos.set_compression(&CompressionSpec::parse("ZIP")?)?;
        assert_eq!(pos.read_all::<i32>()?, vec![101, 250, 1024, 4096]);

        let ids = file.resolve_mut("sample.id")?.array_mut()?;
        ids.cache()?;
        assert_eq!(ids.load_mode(), LoadMode::InMemory);
        ids.write_strings(&[1], &[1], &["NA2"])?;
        file.close()?;
    }

    let file = GdsFile::open(&path, OpenOptions::read_only())?;
    assert!(file.root().resolve("snp.annot/position", false)?.is_none());
    let pos = file.resolve("position")?.array()?;
    assert_eq!(pos.compression().name(), "ZIP");
    assert_eq!(pos.read_all::<i32>()?, vec![101, 250, 1024, 4096]);

    let original = file.resolve("genotype")?;
    let copy = file.resolve("snp.annot/genotype.copy")?;
    assert!(copy.attrs().contains("snp.order"));
    assert_ne!(copy.array()?.stream_id(), original.array()?.stream_id());
    assert_eq!(copy.array()?.read_all::<u8>()?, original.array()?.read_all::<u8>()?);

    let ids = file.resolve("sample.id")?.array()?;
    assert_eq!(ids.read_strings(&[0], &[3], None)?, vec!["NA001", "NA2", "NA00003"]);
    Ok(())
}
