//! Serialization of operator options, for pipelines configured from files.
#![cfg(feature = "serde")]

use millrace::channel::{Concurrency, HaltStrategy, MapEffectOptions, MergeAllOptions};
use millrace::FiberId;
use serde_json::json;

#[test]
fn map_effect_options_serialize_as_plain_fields() {
    let options = MapEffectOptions::new()
        .with_concurrency(4)
        .with_unordered(true)
        .with_buffer_size(32);

    let value = serde_json::to_value(options).unwrap();
    assert_eq!(
        value,
        json!({
            "concurrency": { "bounded": 4 },
            "unordered": true,
            "buffer_size": 32,
        })
    );

    let back: MapEffectOptions = serde_json::from_value(value).unwrap();
    assert_eq!(back, options);
}

#[test]
fn missing_fields_fall_back_to_defaults() {
    let options: MergeAllOptions = serde_json::from_str(r#"{ "switch": true }"#).unwrap();
    assert!(options.switch());
    assert_eq!(options, MergeAllOptions::new().with_switch(true));

    let options: MapEffectOptions = serde_json::from_str("{}").unwrap();
    assert_eq!(options, MapEffectOptions::default());
}

#[test]
fn unit_variants_use_snake_case() {
    assert_eq!(
        serde_json::to_string(&Concurrency::Unbounded).unwrap(),
        r#""unbounded""#
    );
    let strategy: HaltStrategy = serde_json::from_str(r#""either""#).unwrap();
    assert_eq!(strategy, HaltStrategy::Either);
}

#[test]
fn fiber_id_is_a_bare_number() {
    let id = FiberId::from_raw(42);
    assert_eq!(serde_json::to_string(&id).unwrap(), "42");
    let back: FiberId = serde_json::from_str("42").unwrap();
    assert_eq!(back, id);
}
