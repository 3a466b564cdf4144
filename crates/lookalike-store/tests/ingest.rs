use image::{Rgb, RgbImage};
use lookalike_core::stub::{StubDetector, StubEmbedder};
use lookalike_core::{FaceNormalizer, GalleryIndex, MetadataResolver, Pipeline};
use lookalike_store::{ingest, ingest_reader, MetadataStore, SkipReason};
use std::path::Path;

fn touch(root: &Path, rel: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, b"img").unwrap();
}

#[test]
fn ingests_rows_and_reports_skips() {
    let catalog = tempfile::tempdir().unwrap();
    touch(catalog.path(), "Heist/Safecracker (A. Actor)/02.jpg");
    touch(catalog.path(), "Heist/Safecracker (A. Actor)/01.png");
    touch(catalog.path(), "Heist/Driver (B. Actor)/notes.txt");

    let csv = "\u{feff}movie,character,actor,path\n\
               Heist,Safecracker,A. Actor,Heist/Safecracker (A. Actor)\n\
               Heist,Driver,B. Actor,Heist/Driver (B. Actor)\n\
               Space,Pilot,C. Actor,Space/Pilot (C. Actor)\n\
               Heist,Safecracker,A. Actor,/Heist/Safecracker (A. Actor)/\n\
               broken,row\n";

    let store = MetadataStore::open_in_memory().unwrap();
    let report = ingest_reader(csv.as_bytes(), catalog.path(), &store).unwrap();

    assert_eq!(report.inserted, 1);
    let reasons: Vec<_> = report.skipped.iter().map(|s| (s.line, &s.reason)).collect();
    assert!(matches!(reasons[0], (3, SkipReason::NoImages(_))));
    assert!(matches!(reasons[1], (4, SkipReason::FolderMissing(_))));
    assert!(matches!(reasons[2], (5, SkipReason::Duplicate)));
    assert!(matches!(reasons[3], (6, SkipReason::Malformed(_))));

    let record = store.lookup("Heist/Safecracker (A. Actor)").unwrap();
    assert_eq!(record.image_file, "01.png");
    assert_eq!(record.movie, "Heist");
    assert_eq!(record.character_actor(), "Safecracker (A. Actor)");
}

#[test]
fn recreate_then_ingest_from_file() {
    let work = tempfile::tempdir().unwrap();
    let catalog = work.path().join("characters");
    touch(&catalog, "Space/Pilot (C. Actor)/a.jpeg");
    let csv_path = work.path().join("mapping.csv");
    let mapping = "movie,character,actor,path\nSpace,Pilot,C. Actor,Space/Pilot (C. Actor)\n";
    std::fs::write(&csv_path, mapping).unwrap();
    let db = work.path().join("characters.db");

    for _ in 0..2 {
        let store = MetadataStore::recreate(&db).unwrap();
        let report = ingest(&csv_path, &catalog, &store).unwrap();
        assert_eq!(report.inserted, 1);
        assert!(report.skipped.is_empty());
    }

    let resolver = MetadataStore::open(&db).unwrap().load_resolver().unwrap();
    assert_eq!(resolver.list_all().unwrap().len(), 1);
    assert_eq!(resolver.lookup("Space/Pilot (C. Actor)").unwrap().image_file, "a.jpeg");
}

#[test]
fn missing_mapping_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = MetadataStore::open_in_memory().unwrap();
    assert!(ingest(&dir.path().join("absent.csv"), dir.path(), &store).is_err());
}

#[test]
fn decomposed_gallery_folder_matches_composed_mapping() {
    // "영화/Café (A. Actor)" composed in the mapping and catalog, decomposed in the gallery.
    let composed = "\u{c601}\u{d654}/Caf\u{e9} (A. Actor)";
    let decomposed = "\u{110b}\u{1167}\u{11bc}\u{1112}\u{116a}/Cafe\u{301} (A. Actor)";

    let catalog = tempfile::tempdir().unwrap();
    touch(catalog.path(), &format!("{composed}/01.png"));
    let csv = format!("movie,character,actor,path\n\u{c601}\u{d654},Barista,A. Actor,{composed}\n");
    let store = MetadataStore::open_in_memory().unwrap();
    assert_eq!(ingest_reader(csv.as_bytes(), catalog.path(), &store).unwrap().inserted, 1);

    let gallery = tempfile::tempdir().unwrap();
    let crop_path = gallery.path().join(decomposed).join("01.png");
    std::fs::create_dir_all(crop_path.parent().unwrap()).unwrap();
    RgbImage::from_pixel(224, 224, Rgb([200, 40, 40])).save(&crop_path).unwrap();

    let index = GalleryIndex::load(gallery.path(), &mut StubEmbedder::new("stub")).unwrap();
    assert_eq!(index.entries()[0].identity_key, composed);

    let resolver = store.load_resolver().unwrap();
    let mut query = RgbImage::new(160, 120);
    for y in 20..100 {
        for x in 40..120 {
            query.put_pixel(x, y, Rgb([200, 40, 40]));
        }
    }
    let mut pipeline = Pipeline::new(
        FaceNormalizer::new(StubDetector::bright_region()),
        StubEmbedder::new("stub"),
    );
    let found = pipeline.identify(&query, &index, &resolver, 1.0).unwrap();
    assert_eq!(found.record.character, "Barista");
    assert_eq!(found.record.image_file, "01.png");
}
