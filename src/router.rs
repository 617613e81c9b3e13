use std::sync::Arc;

use anyhow::Context;
use filter_bus::{caps::Caps, decodebin::DecodeBin, encodebin::EncodeBin, pad::Pad};

use crate::assemble::Assembled;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadLinkDecision {
    /// Through the video filter chain into the encoder.
    VideoPath,
    /// Straight into the encoder.
    Passthrough,
}

impl PadLinkDecision {
    pub fn for_caps(caps: &Caps) -> Self {
        if caps.to_string().starts_with(filter_bus::caps::RAW_VIDEO) {
            PadLinkDecision::VideoPath
        } else {
            PadLinkDecision::Passthrough
        }
    }
}

/// Links each new decodebin pad into a freshly requested encodebin pad.
#[derive(Clone)]
pub struct DynamicRouter {
    encodebin: Arc<EncodeBin>,
    chain_in: Pad,
    chain_out: Pad,
}

impl DynamicRouter {
    pub fn new(assembled: &Assembled) -> Self {
        Self {
            encodebin: assembled.encodebin.clone(),
            chain_in: assembled.chain_in.clone(),
            chain_out: assembled.chain_out.clone(),
        }
    }

    /// Routes the pad on every `pad-added` of `decodebin`.
    pub fn attach(self, decodebin: &DecodeBin) {
        decodebin.connect_pad_added(move |_, pad| self.connect_pad(pad).map(drop));
    }

    pub fn connect_pad(&self, pad: &Pad) -> anyhow::Result<PadLinkDecision> {
        let caps = pad.caps();
        println!("new decodebin pad {} with caps {}", pad, caps);

        let encoder_pad = self.encodebin.request_pad(&caps).inspect_err(|e| {
            log::error!("no encoder pad for {} ({}): {:#}", pad, caps, e);
        })?;

        let decision = PadLinkDecision::for_caps(&caps);
        if let Err(e) = self.link(decision, pad, &encoder_pad) {
            log::error!("could not link {} ({}): {:#}", pad, caps, e);
            self.encodebin.release_pad(&encoder_pad);
            return Err(e);
        }
        log::info!("{} -> {} ({:?})", pad, encoder_pad, decision);
        Ok(decision)
    }

    fn link(&self, decision: PadLinkDecision, pad: &Pad, encoder_pad: &Pad) -> anyhow::Result<()> {
        match decision {
            PadLinkDecision::Passthrough => pad
                .link(encoder_pad)
                .with_context(|| format!("could not link {} to {}", pad, encoder_pad)),
            PadLinkDecision::VideoPath => {
                pad.link(&self.chain_in)
                    .with_context(|| format!("could not link {} to {}", pad, self.chain_in))?;
                if let Err(e) = self.chain_out.link(encoder_pad) {
                    pad.unlink();
                    return Err(e).with_context(|| {
                        format!("could not link {} to {}", self.chain_out, encoder_pad)
                    });
                }
                Ok(())
            }
        }
    }
}
