use bimcache_format::section::{compute_checksum, Directory};
use bimcache_format::{
    CacheError, CacheMetadata, CacheReader, CacheWriter, EntityRecord, GeometryPayload,
    ModelCache, PropertyRecord, PropertyType, QuantityRecord, QuantityType, ReadOptions,
    RelationshipRecord, RelationshipType, SectionKind, WriteOptions, HEADER_SIZE,
};

const QTO: &str = "Qto_WallBaseQuantities";
const PSET: &str = "Pset_WallCommon";

fn sample_model() -> ModelCache {
    let mut b = ModelCache::builder();
    b.add_entity(EntityRecord::new(1, "IFCPROJECT").with_name("Projekt"))
        .unwrap();
    b.add_entity(
        EntityRecord::new(2, "IFCBUILDINGSTOREY")
            .with_global_id("0kF9$Yzz18ROzt8cN9pK2S")
            .with_name("EG"),
    )
    .unwrap();
    b.add_entity(
        EntityRecord::new(10, "IFCWALL")
            .with_global_id("3vB2YO$MX4xv5uCqZZG05x")
            .with_name("Wall-1")
            .with_description("Exterior")
            .with_object_type("Basic Wall:Generic 200mm")
            .with_geometry(Some(0))
            .contained_in(2)
            .typed_by(40),
    )
    .unwrap();
    b.add_entity(EntityRecord::new(20, "IFCDOOR").with_name("Door-1").contained_in(2))
        .unwrap();
    b.add_entity(
        EntityRecord::new(30, "IFCWALL")
            .with_global_id("1hOSvn6df7F8_7GcBWlR72")
            .with_name("Wall-2")
            .with_geometry(Some(1))
            .contained_in(2),
    )
    .unwrap();
    b.add_entity(EntityRecord::new(40, "IFCWALLTYPE").with_name("Generic 200mm"))
        .unwrap();

    b.add_property(PropertyRecord::text(10, PSET, "Reference", "AW-01"))
        .add_property(PropertyRecord::boolean(10, PSET, "IsExternal", true))
        .add_property(PropertyRecord::real(10, PSET, "ThermalTransmittance", 0.28).with_unit("W/(m2K)"))
        .add_property(PropertyRecord::text(30, PSET, "Reference", "AW-02"))
        .add_property(PropertyRecord::text(30, "Pset_Manufacturer", "Name", "ACME").typed(PropertyType::Label))
        .add_property(PropertyRecord::logical(20, "Pset_DoorCommon", "FireExit", None));

    b.add_quantity(QuantityRecord::new(10, QTO, "NetVolume", QuantityType::Volume, 1.0))
        .add_quantity(QuantityRecord::new(20, "Qto_DoorBaseQuantities", "Area", QuantityType::Area, 2.1))
        .add_quantity(QuantityRecord::new(30, QTO, "NetVolume", QuantityType::Volume, 2.0))
        .add_quantity(QuantityRecord::new(10, QTO, "Length", QuantityType::Length, 5.0).with_unit("m"))
        .add_quantity(QuantityRecord::new(30, QTO, "Length", QuantityType::Length, 3.0).with_unit("m"));

    for related in [10, 20, 30] {
        b.add_relationship(RelationshipRecord::new(
            RelationshipType::ContainedInSpatialStructure,
            2,
            related,
        ));
    }
    b.add_relationship(RelationshipRecord::new(RelationshipType::Aggregates, 1, 2));
    b.add_relationship(RelationshipRecord::new(RelationshipType::DefinesByType, 40, 10));

    b.geometry(GeometryPayload::new(*b"GLB\0", vec![0x5au8; 100]));
    b.metadata(CacheMetadata::new("IFC4").with_source("house.ifc", "deadbeef", 4096));
    b.finish().unwrap()
}

fn assert_same_model(a: &ModelCache, b: &ModelCache) {
    let (ea, eb) = (a.entities(), b.entities());
    assert_eq!(ea.len(), eb.len());
    assert_eq!(ea.ids().collect::<Vec<_>>(), eb.ids().collect::<Vec<_>>());
    for id in ea.ids() {
        assert_eq!(ea.entity(id), eb.entity(id), "entity #{id}");
        assert_eq!(ea.name(id), eb.name(id));
        assert_eq!(ea.global_id(id), eb.global_id(id));
        assert_eq!(ea.type_name(id), eb.type_name(id));
        assert_eq!(ea.has_geometry(id), eb.has_geometry(id));
        if let Some(gid) = ea.global_id(id) {
            assert_eq!(eb.id_for_global_id(gid), Some(id));
        }

        let (pa, pb) = (a.properties().unwrap(), b.properties().unwrap());
        assert_eq!(pa.for_entity(id), pb.for_entity(id), "psets of #{id}");
        let (qa, qb) = (a.quantities().unwrap(), b.quantities().unwrap());
        assert_eq!(qa.for_entity(id), qb.for_entity(id), "qsets of #{id}");
        for set in qa.for_entity(id) {
            for q in &set.quantities {
                assert_eq!(qb.value(id, set.name, q.name), Some(q.value));
            }
        }
    }
    for name in ea.type_names() {
        assert_eq!(ea.by_type_name(name), eb.by_type_name(name), "type {name}");
    }
    assert_eq!(ea.global_id_map(), eb.global_id_map());
}

#[test]
fn test_full_roundtrip() {
    let model = sample_model();
    let bytes = model.to_bytes().unwrap();
    let loaded = CacheReader::new(ReadOptions::default()).read(bytes).unwrap();
    assert!(loaded.report.is_clean());

    let decoded = &loaded.cache;
    assert_same_model(&model, decoded);

    let entities = decoded.entities();
    assert_eq!(entities.by_type_name("IFCWALL"), vec![10, 30]);
    assert_eq!(entities.id_for_global_id("1hOSvn6df7F8_7GcBWlR72"), Some(30));
    assert_eq!(entities.object_type(10), Some("Basic Wall:Generic 200mm"));

    let quantities = decoded.quantities().unwrap();
    assert_eq!(quantities.sum_by_type("NetVolume"), 3.0);
    assert_eq!(quantities.sum_by_type("Length"), 8.0);

    let properties = decoded.properties().unwrap();
    assert_eq!(properties.entities_with_property("Reference"), vec![10, 30]);

    let rels = decoded.relationships().unwrap();
    assert_eq!(rels.contained_elements(2), &[10, 20, 30]);
    assert_eq!(rels.decomposed_by(1), &[2]);
    assert_eq!(rels.relating(10, RelationshipType::DefinesByType), &[40]);

    assert_eq!(decoded.geometry(), model.geometry());
    assert_eq!(decoded.metadata(), model.metadata());
}

#[test]
fn test_reencoding_a_loaded_cache_is_byte_identical() {
    let model = sample_model();
    let first = model.to_bytes().unwrap();
    let second = ModelCache::from_bytes(first.clone())
        .unwrap()
        .to_bytes()
        .unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_interleaved_types_use_row_order() {
    let mut b = ModelCache::builder();
    b.add_entity(EntityRecord::new(10, "Wall")).unwrap();
    b.add_entity(EntityRecord::new(20, "Door")).unwrap();
    b.add_entity(EntityRecord::new(30, "Wall")).unwrap();
    let cache = ModelCache::from_bytes(b.finish().unwrap().to_bytes().unwrap()).unwrap();

    assert_eq!(cache.entities().by_type_name("Wall"), vec![10, 30]);
    assert_eq!(cache.entities().by_type_name("Door"), vec![20]);
}

#[test]
fn test_sum_by_type_example() {
    let mut b = ModelCache::builder();
    for id in [1, 2, 3] {
        b.add_entity(EntityRecord::new(id, "IFCWALL")).unwrap();
    }
    b.add_quantity(QuantityRecord::new(1, QTO, "NetVolume", QuantityType::Volume, 1.0))
        .add_quantity(QuantityRecord::new(2, QTO, "NetVolume", QuantityType::Volume, 2.0))
        .add_quantity(QuantityRecord::new(3, QTO, "NetVolume", QuantityType::Volume, 3.0))
        .add_quantity(QuantityRecord::new(1, QTO, "GrossVolume", QuantityType::Volume, 9.0));
    let cache = ModelCache::from_bytes(b.finish().unwrap().to_bytes().unwrap()).unwrap();
    assert_eq!(cache.quantities().unwrap().sum_by_type("NetVolume"), 6.0);
}

#[test]
fn test_unknown_section_is_skipped() {
    let model = sample_model();
    let mut writer = CacheWriter::new(WriteOptions::default());
    writer
        .add_raw_section(0x0042, 0, b"from a newer writer".to_vec())
        .unwrap();
    let bytes = writer.write(&model).unwrap();

    let loaded = CacheReader::new(ReadOptions::default()).read(bytes).unwrap();
    assert_eq!(loaded.report.unknown_sections().collect::<Vec<_>>(), vec![0x0042]);
    assert!(loaded.report.issues.iter().all(|e| !e.is_fatal()));
    assert_same_model(&model, &loaded.cache);
}

#[test]
fn test_newer_minor_version_and_unknown_flags_are_accepted() {
    let mut bytes = sample_model().to_bytes().unwrap();
    bytes[4] = 0x07; // minor
    bytes[6] = 0xff; // header flags
    bytes[7] = 0xff;
    let dir = Directory::decode(&bytes).unwrap();
    // Section flags live in the last two bytes of each 12-byte entry.
    for i in 0..dir.entries.len() {
        let at = HEADER_SIZE + 4 + i * 12 + 10;
        bytes[at] = 0x01;
    }
    let checksum = compute_checksum(&bytes);
    bytes[8..16].copy_from_slice(&checksum.to_le_bytes());

    let cache = ModelCache::from_bytes(bytes).unwrap();
    assert_eq!(cache.entities().len(), 6);
}

#[test]
fn test_major_version_mismatch() {
    let mut bytes = sample_model().to_bytes().unwrap();
    bytes[5] = 0x02;
    let err = ModelCache::from_bytes(bytes).unwrap_err();
    assert!(matches!(
        err,
        CacheError::VersionMismatch {
            found: 0x0200,
            supported_major: 1
        }
    ));
    assert!(err.is_stale_or_corrupt());
}

#[test]
fn test_single_byte_flip_is_detected() {
    let clean = sample_model().to_bytes().unwrap();
    let dir = Directory::decode(&clean).unwrap();
    for kind in [
        SectionKind::Strings,
        SectionKind::Entities,
        SectionKind::Properties,
        SectionKind::Quantities,
        SectionKind::Geometry,
    ] {
        let entry = dir.find(kind).unwrap();
        let mut bytes = clean.clone();
        bytes[entry.offset as usize + entry.length as usize / 2] ^= 0x10;
        assert!(
            matches!(
                ModelCache::from_bytes(bytes),
                Err(CacheError::CorruptCache(_))
            ),
            "flip in {kind} went unnoticed"
        );
    }
}

#[test]
fn test_truncated_buffer_is_corrupt() {
    let bytes = sample_model().to_bytes().unwrap();
    for len in [0, 3, 16, HEADER_SIZE, bytes.len() / 2, bytes.len() - 1] {
        let err = ModelCache::from_bytes(bytes[..len].to_vec()).unwrap_err();
        assert!(
            matches!(err, CacheError::CorruptCache(_)),
            "len {len}: {err}"
        );
    }
}

#[test]
fn test_not_a_cache() {
    let err = ModelCache::from_bytes(b"ISO-10303-21;\nHEADER;".to_vec()).unwrap_err();
    assert!(matches!(err, CacheError::CorruptCache(_)));
}
