use serde_json::Value;

fn schema() -> Value {
    serde_json::to_value(nova_config::json_schema()).unwrap()
}

#[test]
fn schema_describes_every_section() {
    let schema = schema();
    let properties = schema["properties"].as_object().unwrap();
    for key in ["encoding", "units", "buffers", "logging"] {
        assert!(properties.contains_key(key), "missing {key}");
    }
    assert_eq!(schema["properties"]["encoding"]["default"], "UTF-8");
}

#[test]
fn cache_sections_require_a_positive_space_limit() {
    let schema = schema();
    let cache = &schema["definitions"]["CacheConfig"];
    assert_eq!(cache["required"], serde_json::json!(["space_limit"]));
    assert_eq!(cache["properties"]["space_limit"]["minimum"], 1.0);
    assert_eq!(cache["additionalProperties"], false);
}
