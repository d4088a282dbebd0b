use std::collections::HashMap;

use feature_decide::{AttributeValue, DecideOptions, EvaluatorConfig, InMemoryUserProfileService};

pub fn main() {
    env_logger::init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "tests/data/datafile.json".to_owned());
    let datafile = std::fs::read_to_string(&path).unwrap();

    let mut config = EvaluatorConfig::new();
    config
        .user_profile_service(InMemoryUserProfileService::new())
        .default_options(DecideOptions {
            include_reasons: true,
            ..DecideOptions::default()
        });
    let evaluator = config.to_evaluator();

    // Until a datafile is published, every decision returns Error::ConfigurationMissing.
    evaluator.publish_datafile(&datafile).unwrap();

    let attributes = HashMap::from([
        ("country".to_owned(), AttributeValue::from("us")),
        ("age".to_owned(), AttributeValue::from(35)),
    ]);

    let experiment = evaluator
        .decide_experiment("checkout_test", "test-user", &attributes)
        .unwrap();
    println!("checkout_test: {:?}", experiment.variation_key());

    let feature = evaluator
        .decide_feature("new_checkout", "test-user", &attributes)
        .unwrap();
    println!(
        "new_checkout: enabled={} source={} variation={:?}",
        feature.is_feature_enabled(),
        feature.source,
        feature.variation_key()
    );
    for message in feature.reasons.messages() {
        println!("  {message}");
    }
}
