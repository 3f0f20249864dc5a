use std::env;

fn main() {
    // Detect enabled acceleration features
    let mut enabled_features = Vec::new();

    if env::var("CARGO_FEATURE_CUDA").is_ok() {
        enabled_features.push("CUDA");
    }
    if env::var("CARGO_FEATURE_COREML").is_ok() {
        enabled_features.push("CoreML");
    }

    if enabled_features.is_empty() {
        println!("cargo:warning=Building with CPU-only inference");
        println!("cargo:warning=To enable GPU: cargo build --features cuda (or coreml on macOS)");
    } else {
        println!("cargo:warning=Acceleration enabled: {}", enabled_features.join(", "));
    }

    let target = env::var("TARGET").unwrap_or_default();
    if enabled_features.contains(&"CoreML") && !target.contains("apple") {
        println!("cargo:warning=CoreML is only available on Apple targets; CPU will be used");
    }
}
