/// Composition integration tests: modifiers, factories, nesting and
/// reproducibility of mastered objects.

use blueprint_engine::{
    seeded, Catalog, Field, FieldSpec, ResolveError, SourceRef, TemplateDecl, Value,
    MAX_NESTING_DEPTH,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn armory() -> Catalog {
    let mut catalog = Catalog::new();
    catalog
        .load_from_ron(Path::new("tests/fixtures/armory.ron"))
        .unwrap();
    catalog
}

fn int(value: Option<&Value>) -> i64 {
    value.and_then(Value::as_int).unwrap()
}

#[test]
fn modifier_on_a_template() {
    let catalog = armory();
    let club = catalog.id_of("Club").unwrap();
    let gnarled = catalog
        .apply_modifier_by_name("Gnarled", club, &mut seeded(1))
        .unwrap();

    assert_eq!(gnarled.get("name"), Some(&Value::from("Gnarled Club")));
    assert_eq!(gnarled.get("value"), Some(&Value::Int(6)));
    assert_eq!(gnarled.get("prefix"), Some(&Value::from("Gnarled")));
    // Keeps the type of what it modified.
    assert_eq!(gnarled.type_name(), "Club");
    assert_eq!(gnarled.template(), club);
    assert!(matches!(gnarled.source(), Some(SourceRef::Template(id)) if *id == club));
    assert!(gnarled.source_object().is_none());
}

#[test]
fn modifier_on_an_object_leaves_it_untouched() {
    let catalog = armory();
    let club = catalog.master_by_name("Club", &mut seeded(2)).unwrap();
    let damage = club.get("damage").cloned();

    let gnarled = catalog
        .apply_modifier_by_name("Gnarled", &club, &mut seeded(3))
        .unwrap();
    assert_eq!(gnarled.get("name"), Some(&Value::from("Gnarled Club")));
    // Fields the modifier does not touch are carried over as they were.
    assert_eq!(gnarled.get("damage").cloned(), damage);

    assert_eq!(club.get("name"), Some(&Value::from("Club")));
    assert_eq!(club.get("value"), Some(&Value::Int(2)));
    assert!(Arc::ptr_eq(&gnarled.source_object().unwrap(), &club));
}

#[test]
fn factory_applies_modifiers_in_order() {
    let catalog = armory();
    let club = catalog.id_of("Club").unwrap();
    let item = catalog.produce_by_name("PrimitiveSmith", &mut seeded(4)).unwrap();

    // Gnarled first (2 * 3), then Masterwork (+10).
    assert_eq!(item.get("value"), Some(&Value::Int(16)));
    assert_eq!(item.get("name"), Some(&Value::from("Masterwork Gnarled Club")));
    assert_eq!(item.get("maker"), Some(&Value::from("Grog")));
    assert!(!item.contains("product"));
    assert_eq!(item.type_name(), "Club");
    assert!(matches!(item.source(), Some(SourceRef::Template(id)) if *id == club));
}

#[test]
fn composition_rejects_the_wrong_kind() {
    let catalog = armory();
    let club = catalog.id_of("Club").unwrap();
    let err = catalog
        .apply_modifier_by_name("Sword", club, &mut seeded(0))
        .unwrap_err();
    assert!(matches!(err, ResolveError::NotAModifier(ref name) if name == "Sword"));

    let err = catalog.produce_by_name("Gnarled", &mut seeded(0)).unwrap_err();
    assert!(matches!(err, ResolveError::NotAFactory(_)));

    let err = catalog.master_by_name("Dragon", &mut seeded(0)).unwrap_err();
    assert!(matches!(err, ResolveError::UnknownTemplate(_)));
}

#[test]
fn chest_fills_itself_from_the_lineage() {
    let catalog = armory();
    let chest = catalog.master_by_name("Chest", &mut seeded(5)).unwrap();

    let weapon = chest.get("weapon").and_then(Value::as_object).unwrap();
    assert_eq!(weapon.type_name(), "Club");
    let armor = chest.get("armor").and_then(Value::as_object).unwrap();
    assert_eq!(armor.type_name(), "LeatherJerkin");
    let defense = int(armor.get("defense"));
    assert!((1..=3).contains(&defense));
    assert_eq!(int(armor.get("value")), defense + 4);

    assert_eq!(int(chest.get("worth")), 2 + defense + 4);
    assert_eq!(
        chest.get("label"),
        Some(&Value::from("a chest holding Club and leather jerkin"))
    );

    let trinket = chest.get("trinket").and_then(Value::as_object).unwrap();
    assert!(["Club", "PointedStick"].contains(&trinket.type_name()));
}

#[test]
fn required_attributes_block_mastering() {
    let catalog = armory();
    let err = catalog.master_by_name("Weapon", &mut seeded(0)).unwrap_err();
    assert!(matches!(
        err.root_cause(),
        ResolveError::UnresolvableField { field, .. } if field == "name"
    ));

    let weapon = catalog.id_of("Weapon").unwrap();
    let named = catalog
        .master_with(weapon, [("name", "Mystery Blade")], &mut seeded(0))
        .unwrap();
    assert_eq!(named.display_name(), "Mystery Blade");
}

#[test]
fn overrides_feed_dependent_fields() {
    let catalog = armory();
    let jerkin = catalog.id_of("LeatherJerkin").unwrap();
    let obj = catalog
        .master_with(jerkin, [("defense", 10i64)], &mut seeded(6))
        .unwrap();
    assert_eq!(obj.get("defense"), Some(&Value::Int(10)));
    assert_eq!(obj.get("value"), Some(&Value::Int(14)));
}

#[test]
fn same_seed_same_object() {
    let catalog = armory();
    let chest = catalog.id_of("Chest").unwrap();
    let a = catalog.master_seeded(chest, 77).unwrap();
    let b = catalog.master_seeded(chest, 77).unwrap();
    assert_eq!(a, b);
    assert!(!Arc::ptr_eq(&a, &b));

    // Nested objects are fresh too.
    let wa = a.get("weapon").and_then(Value::as_object).unwrap();
    let wb = b.get("weapon").and_then(Value::as_object).unwrap();
    assert_eq!(wa, wb);
    assert!(!Arc::ptr_eq(wa, wb));
}

#[test]
fn collections_are_reproducible() {
    let catalog = armory();
    let sword = catalog.id_of("Sword").unwrap();
    let first = catalog.collection(sword, "vault").take(8).unwrap();
    let second = catalog.collection(sword, "vault").take(8).unwrap();
    assert_eq!(first, second);
    assert_eq!(catalog.collection(sword, "vault").get(5).unwrap(), first[5]);
}

#[test]
fn cycles_are_reported_with_their_path() {
    let mut catalog = Catalog::new();
    let knot = catalog
        .declare(
            TemplateDecl::new("Knot")
                .value("base", 1i64)
                .field("a", Field::reference("b").unwrap() + 1i64)
                .field("b", Field::reference("a").unwrap() + 1i64),
        )
        .unwrap();

    let err = catalog.master(knot, &mut seeded(0)).unwrap_err();
    match err.root_cause() {
        ResolveError::CircularDependency { template, fields } => {
            assert_eq!(template, "Knot");
            assert_eq!(fields, &["a", "b"]);
        }
        other => panic!("expected a cycle, got {other:?}"),
    }
}

#[test]
fn self_nesting_hits_the_depth_limit() {
    let mut catalog = Catalog::new();
    let turtle = catalog
        .declare(TemplateDecl::new("Turtle").field("below", Field::nested("Turtle")))
        .unwrap();

    let err = catalog.master(turtle, &mut seeded(0)).unwrap_err();
    assert!(matches!(
        err.root_cause(),
        ResolveError::NestingTooDeep { template, depth }
            if template == "Turtle" && *depth == MAX_NESTING_DEPTH
    ));
}

#[test]
fn template_values_become_fresh_objects() {
    let mut catalog = armory();
    let club = catalog.id_of("Club").unwrap();
    let rack = catalog
        .declare(
            TemplateDecl::new("Rack")
                .value("weapon", club)
                .field("worth", Field::reference("weapon.value").unwrap() + 1i64),
        )
        .unwrap();

    let first = catalog.master(rack, &mut seeded(10)).unwrap();
    let second = catalog.master(rack, &mut seeded(10)).unwrap();
    let a = first.get("weapon").and_then(Value::as_object).unwrap();
    let b = second.get("weapon").and_then(Value::as_object).unwrap();
    assert_eq!(a.type_name(), "Club");
    assert_eq!(a.get("name"), Some(&Value::from("Club")));
    assert!(!Arc::ptr_eq(a, b));
    // Statics are objects before dependent fields read them.
    assert_eq!(int(first.get("worth")), 3);

    // Overrides naming a template are mastered the same way.
    let sword = catalog.id_of("Sword").unwrap();
    let swapped = catalog
        .master_with(rack, [("weapon", Value::Template(sword))], &mut seeded(10))
        .unwrap();
    let weapon = swapped.get("weapon").and_then(Value::as_object).unwrap();
    assert_eq!(weapon.type_name(), "Sword");
    assert_eq!(int(swapped.get("worth")), 16);
}

#[test]
fn nested_objects_read_their_parent() {
    let mut catalog = Catalog::new();
    let rug = catalog
        .declare(
            TemplateDecl::new("Rug")
                .field("width", Field::reference("parent.size").unwrap() * 2i64)
                .field("label", Field::format("rug for a {parent.name}").unwrap()),
        )
        .unwrap();
    let room = catalog
        .declare(
            TemplateDecl::new("Room")
                .value("name", "parlor")
                .value("size", 3i64)
                .field("rug", Field::nested("Rug")),
        )
        .unwrap();

    let obj = catalog.master(room, &mut seeded(0)).unwrap();
    let nested = obj.get("rug").and_then(Value::as_object).unwrap();
    assert_eq!(nested.get("width"), Some(&Value::Int(6)));
    assert_eq!(nested.get("label"), Some(&Value::from("rug for a parlor")));

    let err = catalog.master(rug, &mut seeded(0)).unwrap_err();
    assert!(matches!(err.root_cause(), ResolveError::MissingParent(_)));
}

#[test]
fn custom_producers_see_resolved_fields() {
    let mut catalog = Catalog::new();
    let potion = catalog
        .declare(
            TemplateDecl::new("Potion")
                .value("doses", 3i64)
                .field("strength", Field::random_int(1, 4))
                .field(
                    "potency",
                    FieldSpec::new(Field::custom(|scope, _rng| {
                        let doses = scope.get("doses").and_then(Value::as_int).unwrap_or(0);
                        let strength = scope
                            .get("strength")
                            .and_then(Value::as_int)
                            .ok_or_else(|| ResolveError::Custom("strength missing".into()))?;
                        Ok(Value::Int(doses * strength))
                    }))
                    .depends_on("strength"),
                ),
        )
        .unwrap();

    let obj = catalog.master(potion, &mut seeded(8)).unwrap();
    let strength = int(obj.get("strength"));
    assert_eq!(int(obj.get("potency")), 3 * strength);

    let broken = catalog
        .declare(
            TemplateDecl::new("Broken")
                .field("x", Field::custom(|_, _| Err(ResolveError::Custom("no luck".into())))),
        )
        .unwrap();
    let err = catalog.master(broken, &mut seeded(0)).unwrap_err();
    assert_eq!(err.to_string(), "in Broken.x: no luck");
}

#[test]
fn oversized_string_repeat_is_an_error() {
    let mut catalog = Catalog::new();
    let banner = catalog
        .declare(TemplateDecl::new("Banner").field("motto", Field::value("ab") * i64::MAX))
        .unwrap();
    let err = catalog.master(banner, &mut seeded(0)).unwrap_err();
    assert!(matches!(err.root_cause(), ResolveError::Arithmetic { .. }));
}

#[test]
fn generators_travel_with_modified_objects() {
    let mut catalog = Catalog::new();
    let gem = catalog
        .declare(
            TemplateDecl::new("Gem")
                .value("name", "ruby")
                .value("value", 10i64)
                .generator("appraise", |obj| {
                    Value::from(format!("{} worth {}", obj.display_name(), int(obj.get("value"))))
                }),
        )
        .unwrap();
    let cut = catalog
        .declare(
            TemplateDecl::new("Cut")
                .modifier()
                .field("value", Field::reference("source.value").unwrap() * 2i64),
        )
        .unwrap();

    let raw = catalog.master(gem, &mut seeded(0)).unwrap();
    assert_eq!(raw.generate("appraise"), Some(Value::from("ruby worth 10")));

    let polished = catalog.apply_modifier(cut, &raw, &mut seeded(0)).unwrap();
    assert!(polished.has_generator("appraise"));
    assert_eq!(polished.generate("appraise"), Some(Value::from("ruby worth 20")));
    assert_eq!(polished.generate("missing"), None);
}

#[test]
fn generators_only_run_when_asked() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let mut catalog = Catalog::new();
    let gem = catalog
        .declare(
            TemplateDecl::new("Gem")
                .value("value", 10i64)
                .generator("appraise", move |obj| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    obj.get("value").cloned().unwrap_or(Value::Int(0))
                }),
        )
        .unwrap();

    let obj = catalog.master(gem, &mut seeded(0)).unwrap();
    let vault = catalog.collection(gem, "hoard").take(3).unwrap();
    assert_eq!(vault.len(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    assert_eq!(obj.generate("appraise"), Some(Value::Int(10)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(obj.generate("appraise"), Some(Value::Int(10)));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn mastering_is_safe_across_threads() {
    let catalog = armory();
    let chest = catalog.id_of("Chest").unwrap();
    let serial: Vec<_> = (0..4)
        .map(|seed| catalog.master_seeded(chest, seed).unwrap())
        .collect();

    let parallel: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|seed| {
                let catalog = &catalog;
                s.spawn(move || catalog.master_seeded(chest, seed).unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(serial, parallel);
}
