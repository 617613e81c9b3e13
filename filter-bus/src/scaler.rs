pub struct Scaler {
    context: ffmpeg_next::software::scaling::Context,
}

impl Scaler {
    pub fn new(context: ffmpeg_next::software::scaling::Context) -> Self {
        Self { context }
    }

    /// Builds a converter from the frame's geometry and format to the target ones.
    pub fn for_frame(
        frame: &ffmpeg_next::frame::Video,
        format: ffmpeg_next::format::Pixel,
        width: u32,
        height: u32,
    ) -> anyhow::Result<Self> {
        let context = ffmpeg_next::software::scaling::Context::get(
            frame.format(),
            frame.width(),
            frame.height(),
            format,
            width,
            height,
            ffmpeg_next::software::scaling::flag::Flags::BILINEAR,
        )?;
        Ok(Self::new(context))
    }

    pub fn run(
        &mut self,
        frame: &ffmpeg_next::frame::Video,
        dst: &mut ffmpeg_next::frame::Video,
    ) -> anyhow::Result<()> {
        self.context.run(frame, dst).map_err(|e| e.into())
    }
}

unsafe impl Send for Scaler {}
