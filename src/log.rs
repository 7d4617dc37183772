use log::LevelFilter;

/// Idempotent; a second initialization attempt is silently ignored.
pub fn init_logging() {
    let _ = env_logger::builder()
        .format_target(false)
        .format_timestamp_secs()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .try_init();
}

#[cfg(test)]
#[ctor::ctor]
fn init() {
    use log::LevelFilter;
    let _ = env_logger::builder()
        .format_timestamp_secs()
        .filter_level(LevelFilter::Debug)
        .parse_default_env()
        .try_init();
}
