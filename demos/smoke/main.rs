use flagline::{EvaluationContext, InMemoryFlag, InMemoryProvider, ProviderEvent, Registry};

pub fn main() -> flagline::Result<()> {
    // Configure env_logger to see flagline logs.
    env_logger::Builder::from_env(env_logger::Env::new().default_filter_or("flagline=debug")).init();

    let registry = Registry::new();
    registry.add_handler(ProviderEvent::Ready, |details| {
        println!("Provider is ready: {}", details.provider_name);
    });

    // Block waiting for the provider to initialize. Until this call returns, clients are served
    // by the no-op provider and return their defaults.
    registry.set_provider_and_wait(InMemoryProvider::new([
        ("discountPercentage", InMemoryFlag::single(0.15)),
        ("enableFeatureA", InMemoryFlag::single(false)),
        ("greetingMessage", InMemoryFlag::single("Hello there!")),
        ("usernameMaxLength", InMemoryFlag::single(50)),
    ]))?;

    let client = registry.client("test-app");
    let context = EvaluationContext::new();

    println!(
        "enableFeatureA: {}",
        client.boolean_value("enableFeatureA", true, &context)
    );
    println!(
        "discountPercentage: {}",
        client.float_value("discountPercentage", 0.0, &context)
    );
    println!(
        "greetingMessage: {}",
        client.string_value("greetingMessage", "", &context)
    );
    println!(
        "usernameMaxLength: {}",
        client.integer_value("usernameMaxLength", 0, &context)
    );

    // Asking for the wrong type returns the default along with the error.
    let mismatch = client.string_details("usernameMaxLength", "unknown", &context);
    println!(
        "{}",
        serde_json::to_string_pretty(&mismatch).unwrap_or_default()
    );

    registry.shutdown();
    Ok(())
}
