//! End-to-end scenarios driving `init` + `worker` through the public blob
//! stores, mirroring real CLI invocations.

use indexmap::IndexMap;
use transcoder::blob::{BlobStore, FileStore};
use transcoder::codec::{self, Format, Image};
use transcoder::jobctl::{self, InitOptions, WorkerOptions};
use transcoder::queue::WorkQueue;
use transcoder::resin::ResinMode;

fn tissue_png(seed: u8) -> Vec<u8> {
    let mut data = vec![0u8; 64 * 64];
    for (i, p) in data.iter_mut().enumerate() {
        *p = ((i as u32 * 97 + seed as u32) % 256) as u8;
    }
    let img = Image { width: 64, height: 64, channels: 1, data };
    codec::encode(Format::Png, &img, None, &IndexMap::new()).unwrap()
}

fn resin_png() -> Vec<u8> {
    let img = Image { width: 64, height: 64, channels: 1, data: vec![200u8; 64 * 64] };
    codec::encode(Format::Png, &img, None, &IndexMap::new()).unwrap()
}

fn base_init(source: &str, db: &str) -> InitOptions {
    InitOptions {
        source: source.to_string(),
        destination: None,
        encoding: "same".to_string(),
        compression: "same".to_string(),
        level: None,
        jxl_effort: 3,
        jxl_decoding_speed: 0,
        delete_original: false,
        ext: None,
        resin: ResinMode::Noop,
        database: db.to_string(),
    }
}

fn base_worker(db: &str) -> WorkerOptions {
    WorkerOptions {
        database: db.to_string(),
        parallel: 1,
        block_size: 2,
        lease_msec: 5_000,
        db_timeout_sec: 5.0,
        ramp_sec: 0.0,
        codec_threads: 0,
        verbose: false,
        progress: false,
        cleanup: false,
    }
}

#[test]
fn png_to_jxl_happy_path_serial_with_cleanup() {
    let tmp = tempfile::tempdir().unwrap();
    let src_dir = tmp.path().join("src");
    std::fs::create_dir_all(&src_dir).unwrap();
    let src = FileStore::new(src_dir.to_str().unwrap()).unwrap();
    src.put("a.png", &tissue_png(1)).unwrap();
    src.put("b.png", &tissue_png(2)).unwrap();

    let db = tmp.path().join("queue.sqlite3").to_str().unwrap().to_string();
    let mut opts = base_init(src_dir.to_str().unwrap(), &db);
    opts.encoding = "jxl".to_string();
    opts.level = Some(100);
    opts.jxl_effort = 1;
    opts.ext = Some("png".to_string());
    let inserted = jobctl::init(opts).unwrap();
    assert_eq!(inserted, 2);

    let mut wopts = base_worker(&db);
    wopts.lease_msec = 5_000;
    wopts.cleanup = true;
    jobctl::worker(wopts).unwrap();

    let dest_dir = tmp.path().join("dst");
    let dest = FileStore::new(dest_dir.to_str().unwrap()).unwrap();
    assert!(dest.get("a.jxl").is_ok());
    assert!(dest.get("b.jxl").is_ok());
    assert!(!std::path::Path::new(&db).exists(), "clean drain should remove the database");
}

#[test]
fn resin_stay_keeps_only_tissue_tiles_in_the_destination() {
    let tmp = tempfile::tempdir().unwrap();
    let src_dir = tmp.path().join("src");
    std::fs::create_dir_all(&src_dir).unwrap();
    let src = FileStore::new(src_dir.to_str().unwrap()).unwrap();
    src.put("tissue.png", &tissue_png(3)).unwrap();
    src.put("resin.png", &resin_png()).unwrap();

    let db = tmp.path().join("queue.sqlite3").to_str().unwrap().to_string();
    let mut opts = base_init(src_dir.to_str().unwrap(), &db);
    opts.encoding = "jpeg".to_string();
    opts.resin = ResinMode::Stay;
    jobctl::init(opts).unwrap();

    let mut wopts = base_worker(&db);
    wopts.lease_msec = 5_000;
    jobctl::worker(wopts).unwrap();

    let dest_dir = tmp.path().join("dst");
    let dest = FileStore::new(dest_dir.to_str().unwrap()).unwrap();
    assert!(dest.get("tissue.jpeg").is_ok());
    assert!(dest.get("resin.jpeg").is_err());

    assert!(src.get("resin.png").is_ok(), "source is untouched under stay");
}

#[test]
fn resin_move_relocates_non_tissue_sources_to_a_sibling_directory() {
    let tmp = tempfile::tempdir().unwrap();
    let src_dir = tmp.path().join("src");
    std::fs::create_dir_all(&src_dir).unwrap();
    let src = FileStore::new(src_dir.to_str().unwrap()).unwrap();
    src.put("tissue.png", &tissue_png(4)).unwrap();
    src.put("resin.png", &resin_png()).unwrap();

    let db = tmp.path().join("queue.sqlite3").to_str().unwrap().to_string();
    let mut opts = base_init(src_dir.to_str().unwrap(), &db);
    opts.encoding = "jpeg".to_string();
    opts.resin = ResinMode::Move;
    jobctl::init(opts).unwrap();

    let mut wopts = base_worker(&db);
    wopts.lease_msec = 5_000;
    jobctl::worker(wopts).unwrap();

    let dest_dir = tmp.path().join("dst");
    let dest = FileStore::new(dest_dir.to_str().unwrap()).unwrap();
    assert!(dest.get("tissue.jpeg").is_ok());
    assert!(dest.get("resin.jpeg").is_err());

    assert!(src.get("resin.png").is_err(), "moved source should no longer be in src/");
    let resin_sibling = FileStore::new(tmp.path().join("resin").to_str().unwrap()).unwrap();
    assert!(resin_sibling.get("resin.png").is_ok(), "moved source should land in a sibling resin/ dir");
}

#[test]
fn delete_original_without_resin_removes_every_matching_source() {
    let tmp = tempfile::tempdir().unwrap();
    let src_dir = tmp.path().join("src");
    std::fs::create_dir_all(&src_dir).unwrap();
    let src = FileStore::new(src_dir.to_str().unwrap()).unwrap();
    src.put("a.png", &tissue_png(5)).unwrap();
    src.put("b.png", &tissue_png(6)).unwrap();

    let db = tmp.path().join("queue.sqlite3").to_str().unwrap().to_string();
    let mut opts = base_init(src_dir.to_str().unwrap(), &db);
    opts.encoding = "jpeg".to_string();
    opts.delete_original = true;
    jobctl::init(opts).unwrap();

    jobctl::worker(base_worker(&db)).unwrap();

    assert!(src.get("a.png").is_err());
    assert!(src.get("b.png").is_err());
    let dest = FileStore::new(tmp.path().join("dst").to_str().unwrap()).unwrap();
    assert!(dest.get("a.jpeg").is_ok());
    assert!(dest.get("b.jpeg").is_ok());
}

#[test]
fn delete_original_with_resin_stay_leaves_resin_sources_behind() {
    let tmp = tempfile::tempdir().unwrap();
    let src_dir = tmp.path().join("src");
    std::fs::create_dir_all(&src_dir).unwrap();
    let src = FileStore::new(src_dir.to_str().unwrap()).unwrap();
    src.put("tissue.png", &tissue_png(7)).unwrap();
    src.put("resin.png", &resin_png()).unwrap();

    let db = tmp.path().join("queue.sqlite3").to_str().unwrap().to_string();
    let mut opts = base_init(src_dir.to_str().unwrap(), &db);
    opts.encoding = "jpeg".to_string();
    opts.resin = ResinMode::Stay;
    opts.delete_original = true;
    jobctl::init(opts).unwrap();

    jobctl::worker(base_worker(&db)).unwrap();

    assert!(src.get("tissue.png").is_err(), "written tissue source should be deleted");
    assert!(src.get("resin.png").is_ok(), "skipped resin source should be left in place");

    let dest = FileStore::new(tmp.path().join("dst").to_str().unwrap()).unwrap();
    assert!(dest.get("tissue.jpeg").is_ok());
    assert!(dest.get("resin.jpeg").is_err());
}

#[test]
fn in_place_transcode_replaces_files_with_their_re_encoded_form() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("tiles");
    std::fs::create_dir_all(&dir).unwrap();
    let store = FileStore::new(dir.to_str().unwrap()).unwrap();
    store.put("a.png", &tissue_png(8)).unwrap();
    store.put("b.png", &tissue_png(9)).unwrap();

    let db = tmp.path().join("queue.sqlite3").to_str().unwrap().to_string();
    let mut opts = base_init(dir.to_str().unwrap(), &db);
    opts.encoding = "jpeg".to_string();
    opts.delete_original = true;
    jobctl::init(opts).unwrap();

    jobctl::worker(base_worker(&db)).unwrap();

    assert!(store.get("a.jpeg").is_ok());
    assert!(store.get("b.jpeg").is_ok());
    assert!(store.get("a.png").is_err());
    assert!(store.get("b.png").is_err());

    let remaining_pngs = store.list(Some("png")).unwrap();
    assert!(remaining_pngs.is_empty());
}

#[test]
fn parallel_workers_drain_the_queue_without_duplicating_writes() {
    let tmp = tempfile::tempdir().unwrap();
    let src_dir = tmp.path().join("src");
    std::fs::create_dir_all(&src_dir).unwrap();
    let src = FileStore::new(src_dir.to_str().unwrap()).unwrap();
    for i in 0..8u8 {
        src.put(&format!("tile_{i}.png"), &tissue_png(i)).unwrap();
    }

    let db = tmp.path().join("queue.sqlite3").to_str().unwrap().to_string();
    let mut opts = base_init(src_dir.to_str().unwrap(), &db);
    opts.encoding = "bmp".to_string();
    let inserted = jobctl::init(opts).unwrap();
    assert_eq!(inserted, 8);

    let mut wopts = base_worker(&db);
    wopts.parallel = 2;
    wopts.lease_msec = 5_000;
    jobctl::worker(wopts).unwrap();

    let dest = FileStore::new(tmp.path().join("dst").to_str().unwrap()).unwrap();
    for i in 0..8u8 {
        assert!(dest.get(&format!("tile_{i}.bmp")).is_ok());
    }

    let mut q = WorkQueue::open(&db, 5_000, 0).unwrap();
    assert_eq!(q.finished().unwrap(), 8);
    assert_eq!(q.num_errors().unwrap(), 0);
    assert_eq!(q.remaining().unwrap(), 0);
}

#[test]
fn parallel_without_a_lease_is_refused_with_a_nonzero_outcome() {
    let tmp = tempfile::tempdir().unwrap();
    let src_dir = tmp.path().join("src");
    std::fs::create_dir_all(&src_dir).unwrap();
    let db = tmp.path().join("queue.sqlite3").to_str().unwrap().to_string();
    jobctl::init(base_init(src_dir.to_str().unwrap(), &db)).unwrap();

    let mut wopts = base_worker(&db);
    wopts.parallel = 2;
    wopts.lease_msec = 0;
    assert!(jobctl::worker(wopts).is_err());
}
