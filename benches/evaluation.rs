use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use flagline::{
    EvaluationContext, EvaluationOptions, InMemoryFlag, InMemoryProvider, Registry,
};

fn criterion_benchmark(c: &mut Criterion) {
    let registry = Registry::new();
    registry
        .set_provider_and_wait(InMemoryProvider::new([
            ("enableFeatureA", InMemoryFlag::single(false)),
            ("greetingMessage", InMemoryFlag::single("Hello there!")),
            (
                "betaBanner",
                InMemoryFlag::new(
                    "hidden",
                    [
                        ("hidden".to_owned(), "".into()),
                        ("shown".to_owned(), "Try the beta!".into()),
                    ],
                )
                .with_context_evaluator(|_, context| {
                    (context.get("beta").and_then(|v| v.as_bool()) == Some(true))
                        .then(|| "shown".to_owned())
                }),
            ),
        ]))
        .unwrap();
    registry.set_evaluation_context(EvaluationContext::new().with_attribute("region", "eu"));
    let client = registry.default_client();

    {
        let mut group = c.benchmark_group("static");
        group.throughput(Throughput::Elements(1));
        let context = EvaluationContext::new();
        group.bench_function("boolean_value", |b| {
            b.iter(|| {
                client.boolean_value(
                    black_box("enableFeatureA"),
                    black_box(true),
                    black_box(&context),
                )
            })
        });
        group.bench_function("string_details", |b| {
            b.iter(|| {
                client.string_details(
                    black_box("greetingMessage"),
                    black_box(""),
                    black_box(&context),
                )
            })
        });
        group.finish();
    }

    {
        let mut group = c.benchmark_group("targeting");
        group.throughput(Throughput::Elements(1));
        let context = EvaluationContext::new()
            .with_targeting_key("subject1")
            .with_attribute("beta", true);
        let options = EvaluationOptions::new().with_hint("requestId", "bench");
        group.bench_function("string_details", |b| {
            b.iter(|| {
                client.string_details(black_box("betaBanner"), black_box(""), black_box(&context))
            })
        });
        group.bench_function("evaluate_with_options", |b| {
            b.iter(|| {
                client.evaluate(
                    black_box("betaBanner"),
                    black_box(String::new()),
                    black_box(&context),
                    black_box(&options),
                )
            })
        });
        group.finish();
    }

    {
        let mut group = c.benchmark_group("missing");
        group.throughput(Throughput::Elements(1));
        let context = EvaluationContext::new();
        group.bench_function("integer_value", |b| {
            b.iter(|| {
                client.integer_value(black_box("doesNotExist"), black_box(0), black_box(&context))
            })
        });
        group.finish();
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
