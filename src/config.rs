use std::sync::LazyLock;

pub struct MediaConfig {
    decoder_name: String,
    encoder_name: String,
    chain_in_name: String,
    chain_out_name: String,
    output_suffix: String,
    ruler_width: usize,
    exit_failure: u8,
    exit_bus_error: u8,
}

impl MediaConfig {
    pub fn new() -> Self {
        Self {
            decoder_name: "d".to_string(),
            encoder_name: "e".to_string(),
            chain_in_name: "vc_i".to_string(),
            chain_out_name: "vc_o".to_string(),
            output_suffix: ".out".to_string(),
            ruler_width: 75,
            exit_failure: 1,
            exit_bus_error: 2,
        }
    }

    pub fn decoder_name(&self) -> &str {
        &self.decoder_name
    }

    pub fn encoder_name(&self) -> &str {
        &self.encoder_name
    }

    /// First element of the video filter chain.
    pub fn chain_in_name(&self) -> &str {
        &self.chain_in_name
    }

    /// Last element of the video filter chain.
    pub fn chain_out_name(&self) -> &str {
        &self.chain_out_name
    }

    /// Inserted between stem and extension of the default output file.
    pub fn output_suffix(&self) -> &str {
        &self.output_suffix
    }

    pub fn ruler_width(&self) -> usize {
        self.ruler_width
    }

    /// Usage, precondition, discovery and construction failures.
    pub fn exit_failure(&self) -> u8 {
        self.exit_failure
    }

    /// Runs ended by a bus error or an aborted main loop.
    pub fn exit_bus_error(&self) -> u8 {
        self.exit_bus_error
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self::new()
    }
}

pub fn config() -> &'static MediaConfig {
    static CONFIG: LazyLock<MediaConfig> = LazyLock::new(MediaConfig::new);
    &CONFIG
}
