use serde_json::{Value, json};
use std::collections::HashSet;
use std::str::FromStr;
use voltek_types::{Item, ItemId};

// ── ItemId ────────────────────────────────────────────────────────

#[test]
fn item_id_from_str_forms() {
    assert_eq!(ItemId::from("42"), ItemId::new("42"));
    assert_eq!(ItemId::from(42_i64), ItemId::new("42"));
    assert_eq!(ItemId::from(42_u64), ItemId::new("42"));
    assert_eq!(ItemId::from_str("abc").unwrap(), ItemId::new("abc"));
}

#[test]
fn item_id_display() {
    assert_eq!(ItemId::new("hero-banner").to_string(), "hero-banner");
}

#[test]
fn item_id_deserializes_string_and_number_to_same_key() {
    let from_string: ItemId = serde_json::from_value(json!("7")).unwrap();
    let from_number: ItemId = serde_json::from_value(json!(7)).unwrap();
    assert_eq!(from_string, from_number);
}

#[test]
fn item_id_rejects_other_json_shapes() {
    assert!(serde_json::from_value::<ItemId>(json!(null)).is_err());
    assert!(serde_json::from_value::<ItemId>(json!(["7"])).is_err());
    assert!(serde_json::from_value::<ItemId>(json!({"id": 7})).is_err());
}

#[test]
fn item_id_serializes_as_plain_string() {
    let json = serde_json::to_value(ItemId::new("42")).unwrap();
    assert_eq!(json, json!("42"));
}

#[test]
fn item_id_from_value() {
    assert_eq!(ItemId::from_value(&json!("x")), Some(ItemId::new("x")));
    assert_eq!(ItemId::from_value(&json!(3.5)), Some(ItemId::new("3.5")));
    assert_eq!(ItemId::from_value(&json!(true)), None);
}

#[test]
fn item_id_hash_and_eq() {
    let mut set = HashSet::new();
    set.insert(ItemId::new("1"));
    set.insert(ItemId::from(1_i64));
    assert_eq!(set.len(), 1);
}

// ── Item ──────────────────────────────────────────────────────────

fn make_item() -> Item {
    Item::from_value(json!({
        "id": 42,
        "title": "Dash cam bundle",
        "price": 149.99,
        "in_stock": true,
        "notes": null,
        "tags": ["camera", "12v"],
    }))
    .unwrap()
}

#[test]
fn item_from_value_rejects_non_objects() {
    assert!(Item::from_value(json!("plain")).is_none());
    assert!(Item::from_value(json!([1, 2])).is_none());
}

#[test]
fn item_get_and_text() {
    let item = make_item();
    assert_eq!(item.get("price"), Some(&json!(149.99)));
    assert_eq!(item.text("title"), Some("Dash cam bundle"));
    assert_eq!(item.text("price"), None);
    assert_eq!(item.get("missing"), None);
}

#[test]
fn item_display_renders_every_shape() {
    let item = make_item();
    assert_eq!(item.display("title"), "Dash cam bundle");
    assert_eq!(item.display("price"), "149.99");
    assert_eq!(item.display("in_stock"), "true");
    assert_eq!(item.display("notes"), "");
    assert_eq!(item.display("missing"), "");
    assert_eq!(item.display("tags"), r#"["camera","12v"]"#);
}

#[test]
fn item_id_field_normalizes_number_form() {
    let item = make_item();
    assert_eq!(item.id(), Some(ItemId::new("42")));

    let stringly = Item::from_value(json!({"id": "42"})).unwrap();
    assert_eq!(stringly.id(), item.id());

    let missing = Item::from_value(json!({"title": "x"})).unwrap();
    assert_eq!(missing.id(), None);
}

#[test]
fn item_set_replaces_value() {
    let mut item = make_item();
    item.set("title", Value::String("Updated".into()));
    assert_eq!(item.text("title"), Some("Updated"));
    assert_eq!(item.len(), 6);
}

#[test]
fn item_contains_counts_null_fields() {
    let item = make_item();
    assert!(item.contains("notes"));
    assert!(!item.contains("missing"));
}

#[test]
fn item_serde_is_transparent() {
    let item = make_item();
    let json = serde_json::to_value(&item).unwrap();
    assert_eq!(json["title"], json!("Dash cam bundle"));
    let back: Item = serde_json::from_value(json).unwrap();
    assert_eq!(back, item);
}

#[test]
fn empty_item_defaults() {
    let item = Item::new();
    assert!(item.is_empty());
    assert_eq!(item.len(), 0);
    assert_eq!(item, Item::default());
}
