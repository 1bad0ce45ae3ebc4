use std::path::Path;

use ethdex_core::config::RootConfig;

pub const ENV_PREFIX: &str = "ETHDEX";

/// Layers the config sources, later ones overriding earlier ones:
/// `/etc/ethdex/daemon.toml`, `ethdex.toml` in the working dir, the explicit
/// file (mandatory when given) and finally `ETHDEX_` env vars, with `__`
/// between nesting levels (`ETHDEX_INDEXER__MAX_RANGE_BLOCKS=500`).
pub fn load_config(explicit_file: Option<&Path>) -> Result<RootConfig, config::ConfigError> {
    let mut s = config::Config::builder();

    s = s.add_source(config::File::with_name("/etc/ethdex/daemon.toml").required(false));

    s = s.add_source(config::File::with_name("ethdex.toml").required(false));

    if let Some(explicit) = explicit_file.and_then(|x| x.to_str()) {
        s = s.add_source(config::File::with_name(explicit).required(true));
    }

    s = s.add_source(
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    s.build()?.try_deserialize()
}
