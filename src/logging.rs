/// Install the `fmt` subscriber for binaries. `RUST_LOG` wins over the default `crudkit=info`.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("crudkit=info"));
    // a second call (tests, embedding binaries) keeps the first subscriber
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
