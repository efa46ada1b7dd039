use bimcache_format::{
    CacheError, EntityRecord, ModelCache, PropertyRecord, PropertyValue, QuantityRecord,
    QuantityType, StringDictionary, HEADER_SIZE,
};
use proptest::prelude::*;

const TYPES: [&str; 4] = ["IFCWALL", "IFCDOOR", "IFCSLAB", "IFCSPACE"];
const ITEMS: [&str; 3] = ["NetVolume", "Area", "Length"];
const SETS: [&str; 2] = ["Qto_A", "Qto_B"];

#[derive(Debug, Clone)]
struct ModelCase {
    // (type index, optional name)
    entities: Vec<(usize, Option<String>)>,
    // (entity index, set index, item index, whole-number value)
    quantities: Vec<(usize, usize, usize, i32)>,
    // (entity index, label)
    labels: Vec<(usize, String)>,
}

fn model_case_strategy() -> impl Strategy<Value = ModelCase> {
    let entities = prop::collection::vec(
        (0usize..TYPES.len(), prop::option::of("[a-zA-Z0-9 äöü-]{0,12}")),
        1..=24,
    );
    let quantities = prop::collection::vec(
        (0usize..64, 0usize..SETS.len(), 0usize..ITEMS.len(), -1000i32..1000),
        0..=32,
    );
    let labels = prop::collection::vec((0usize..64, "[A-Z]{1,3}-[0-9]{1,2}"), 0..=8);
    (entities, quantities, labels).prop_map(|(entities, quantities, labels)| ModelCase {
        entities,
        quantities,
        labels,
    })
}

fn express_id(i: usize) -> u32 {
    // Sparse and not monotonic in row order.
    ((i as u32) * 7919) % 100_003 + 1
}

fn build(case: &ModelCase) -> ModelCache {
    let n = case.entities.len();
    let mut b = ModelCache::builder();
    for (i, (ty, name)) in case.entities.iter().enumerate() {
        let mut record = EntityRecord::new(express_id(i), TYPES[*ty]);
        if let Some(name) = name {
            record = record.with_name(name.clone());
        }
        b.add_entity(record).unwrap();
    }
    for (e, set, item, value) in &case.quantities {
        b.add_quantity(QuantityRecord::new(
            express_id(e % n),
            SETS[*set],
            ITEMS[*item],
            QuantityType::Volume,
            f64::from(*value),
        ));
    }
    for (e, label) in &case.labels {
        b.add_property(PropertyRecord::text(express_id(e % n), "Pset_X", "Label", label.clone()));
    }
    b.finish().unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn decoded_lookups_match_naive_scan(case in model_case_strategy()) {
        let n = case.entities.len();
        let cache = ModelCache::from_bytes(build(&case).to_bytes().unwrap()).unwrap();
        let entities = cache.entities();
        prop_assert_eq!(entities.len(), n);

        for (t, name) in TYPES.iter().enumerate() {
            let expected: Vec<u32> = case
                .entities
                .iter()
                .enumerate()
                .filter(|(_, (ty, _))| *ty == t)
                .map(|(i, _)| express_id(i))
                .collect();
            prop_assert_eq!(entities.by_type_name(name), expected);
        }

        for (i, (_, name)) in case.entities.iter().enumerate() {
            let id = express_id(i);
            prop_assert_eq!(entities.name(id), name.as_deref());
        }

        let quantities = cache.quantities();
        for (k, item) in ITEMS.iter().enumerate() {
            let expected: Vec<(u32, f64)> = case
                .quantities
                .iter()
                .filter(|q| q.2 == k)
                .map(|q| (express_id(q.0 % n), f64::from(q.3)))
                .collect();
            let sum: f64 = expected.iter().map(|(_, v)| v).sum();
            let actual = quantities.map(|q| q.values_by_name(item)).unwrap_or_default();
            prop_assert_eq!(&actual, &expected);
            prop_assert_eq!(quantities.map_or(0.0, |q| q.sum_by_type(item)), sum);
        }

        let labelled: Vec<(u32, String)> = case
            .labels
            .iter()
            .map(|(e, label)| (express_id(e % n), label.clone()))
            .collect();
        let actual: Vec<(u32, String)> = cache
            .properties()
            .map(|p| {
                p.values_by_name("Label")
                    .into_iter()
                    .filter_map(|(id, v)| match v {
                        PropertyValue::Text(s) => Some((id, s.to_string())),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        prop_assert_eq!(actual, labelled);
    }

    #[test]
    fn any_flipped_payload_byte_is_corrupt(case in model_case_strategy(), pos in any::<prop::sample::Index>(), bit in 0u8..8) {
        let mut bytes = build(&case).to_bytes().unwrap();
        let at = HEADER_SIZE + pos.index(bytes.len() - HEADER_SIZE);
        bytes[at] ^= 1 << bit;
        prop_assert!(matches!(
            ModelCache::from_bytes(bytes),
            Err(CacheError::CorruptCache(_))
        ));
    }

    #[test]
    fn dictionary_survives_encode_decode(strings in prop::collection::vec(".{0,16}", 0..64)) {
        let mut dict = StringDictionary::new();
        let indices: Vec<u32> = strings.iter().map(|s| dict.intern_str(s).unwrap()).collect();

        let mut w = bimcache_format::ByteWriter::new();
        dict.encode(&mut w).unwrap();
        let mut r = bimcache_format::ByteReader::new(w.build().into());
        let decoded = StringDictionary::decode(&mut r).unwrap();

        prop_assert_eq!(decoded.len(), dict.len());
        for (s, idx) in strings.iter().zip(indices) {
            prop_assert_eq!(decoded.get(idx), Some(s.as_str()));
            prop_assert_eq!(decoded.lookup(s), Some(idx));
        }
    }
}
