use std::sync::Arc;

use filter_bus::{
    decodebin::DecodeBin,
    encodebin::EncodeBin,
    pad::Pad,
    parse::quote,
    pipeline::{Element, Pipeline},
    profile::EncodingProfile,
};

use crate::{config::config, paths::MediaPaths};

/// A built pipeline and the handles the router and driver need.
pub struct Assembled {
    pub pipeline: Pipeline,
    pub decodebin: Arc<DecodeBin>,
    pub encodebin: Arc<EncodeBin>,
    /// Sink pad of the first video filter.
    pub chain_in: Pad,
    /// Source pad of the last video filter.
    pub chain_out: Pad,
}

//                          /-> videoconvert -> timeoverlay -> videoconvert -\
// filesrc --> decodebin --+                                                  +-> encodebin -> filesink
//                          \------------------------------------------------/
pub fn render_template(paths: &MediaPaths) -> String {
    let cfg = config();
    format!(
        "filesrc location={input}\n\
         ! decodebin name={d}\n\
         \n\
         encodebin name={e}\n\
         ! filesink location={output}\n\
         \n\
         videoconvert name={vc_i} ! timeoverlay ! videoconvert name={vc_o}\n",
        input = quote(&paths.input().to_string_lossy()),
        output = quote(&paths.output().to_string_lossy()),
        d = cfg.decoder_name(),
        e = cfg.encoder_name(),
        vc_i = cfg.chain_in_name(),
        vc_o = cfg.chain_out_name(),
    )
}

pub fn assemble(paths: &MediaPaths, profile: &EncodingProfile) -> anyhow::Result<Assembled> {
    let cfg = config();
    let pipeline = Pipeline::parse_launch(&render_template(paths))?;

    let element = |name: &str| {
        pipeline
            .by_name(name)
            .ok_or(anyhow::anyhow!("{} has no element {}", pipeline.name(), name))
    };
    let decodebin = element(cfg.decoder_name())?
        .as_decodebin()
        .cloned()
        .ok_or(anyhow::anyhow!("{} is not a decodebin", cfg.decoder_name()))?;
    let encodebin = element(cfg.encoder_name())?
        .as_encodebin()
        .cloned()
        .ok_or(anyhow::anyhow!("{} is not an encodebin", cfg.encoder_name()))?;
    let chain_in = element(cfg.chain_in_name())?
        .static_pad("sink")
        .ok_or(anyhow::anyhow!("{} has no sink pad", cfg.chain_in_name()))?;
    let chain_out = element(cfg.chain_out_name())?
        .static_pad("src")
        .ok_or(anyhow::anyhow!("{} has no src pad", cfg.chain_out_name()))?;

    encodebin.set_profile(profile.clone());
    Ok(Assembled {
        pipeline,
        decodebin,
        encodebin,
        chain_in,
        chain_out,
    })
}
