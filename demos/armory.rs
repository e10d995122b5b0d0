/// Armory example: loads the weapon and armor declarations, rolls a few
/// items, runs them through modifiers and a factory, and fills a vault.
///
/// Run with: cargo run --example armory
/// Set RUST_LOG=blueprint_engine=debug to see declarations and composition.

use blueprint_engine::{seeded, Catalog, TagQuery, Value};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .init();

    let catalog = Catalog::builder()
        .declarations_file("tests/fixtures/armory.ron")
        .build()
        .expect("Failed to load armory declarations");
    let mut rng = seeded(1987);

    // --- Query the item lineage ---
    let item = catalog.id_of("Item").expect("Item is declared");
    let repo = catalog.repository_of(item).expect("Item has a repository");
    println!("=== Weapons without metal ===");
    for id in repo.query_ordered(&TagQuery::parse("weapon !metal")) {
        let def = catalog.template(id).expect("registered templates exist");
        println!("  {} [{}]", def.name(), def.tags());
    }

    // --- Master a few items ---
    println!("\n=== Mastered ===");
    for name in ["Club", "Sword", "LeatherJerkin", "Chest"] {
        let obj = catalog
            .master_by_name(name, &mut rng)
            .expect("Failed to master item");
        let fields: Vec<String> = obj
            .fields()
            .filter(|(_, value)| !matches!(value, Value::Object(_)))
            .map(|(field, value)| format!("{field}={value}"))
            .collect();
        println!("  {}: {}", obj.type_name(), fields.join(", "));
    }

    // --- Modifiers and factories ---
    println!("\n=== Composition ===");
    let club = catalog.master_by_name("Club", &mut rng).expect("Failed to master club");
    let gnarled = catalog
        .apply_modifier_by_name("Gnarled", &club, &mut rng)
        .expect("Failed to apply modifier");
    println!(
        "  {} -> {} (value {})",
        club.display_name(),
        gnarled.display_name(),
        gnarled.get("value").map_or_else(String::new, Value::to_string),
    );

    for _ in 0..3 {
        let product = catalog
            .produce_by_name("PrimitiveSmith", &mut rng)
            .expect("Failed to run factory");
        println!(
            "  {} made {} worth {}",
            product.get("maker").map_or_else(String::new, Value::to_string),
            product.display_name(),
            product.get("value").map_or_else(String::new, Value::to_string),
        );
    }

    // --- A reproducible vault ---
    println!("\n=== Vault (seed \"dragon-hoard\") ===");
    let sword = catalog.id_of("Sword").expect("Sword is declared");
    let vault = catalog.collection(sword, "dragon-hoard");
    for (i, blade) in vault.iter().take(5).enumerate() {
        let blade = blade.expect("Failed to master vault item");
        println!(
            "  #{i}: {} quality, damage {}",
            blade.get("quality").map_or_else(String::new, Value::to_string),
            blade.get("damage").map_or_else(String::new, Value::to_string),
        );
    }
}
