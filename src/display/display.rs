//! SDL2 Window Display Module
//! Polls the color stream and shows the newest frame in an SDL2 window.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use sdl2::event::Event;
use sdl2::pixels::PixelFormatEnum;
use sdl2::render::{Canvas, TextureCreator};
use sdl2::video::{Window, WindowContext};
use tracing::{debug, info};

use crate::stream::StopOnDrop;
use crate::{DisplayConfig, Frame};

/// SDL2 Window Display
/// Handles window creation, event loop, and frame rendering.
pub struct Sdl2Display {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    poll_interval: Duration,
}

impl Sdl2Display {
    pub fn new(sdl_context: &sdl2::Sdl, config: &DisplayConfig) -> Result<Self> {
        let video_subsystem = sdl_context.video().map_err(|e| eyre!(e))?;

        let window = video_subsystem
            .window("Iris", config.width, config.height)
            .position_centered()
            .resizable()
            .build()?;

        let canvas = window.into_canvas().present_vsync().build()?;
        let texture_creator = canvas.texture_creator();

        Ok(Self {
            canvas,
            texture_creator,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        })
    }

    /// Draw `frame` scaled to the window. Placeholder frames draw black.
    pub fn render_frame(&mut self, frame: &Frame) -> Result<()> {
        let (width, height) = frame.image.dimensions();

        let mut texture = self
            .texture_creator
            .create_texture_streaming(PixelFormatEnum::RGB24, width, height)
            .map_err(|e| eyre!(e))?;

        texture
            .update(None, frame.image.as_raw(), (width * 3) as usize)
            .map_err(|e| eyre!(e))?;

        self.canvas.clear();
        self.canvas
            .copy(&texture, None, None)
            .map_err(|e| eyre!(e))?;

        self.canvas.present();
        Ok(())
    }

    /// Show frames until the window closes or `shutdown` is raised.
    ///
    /// Takes the stream guard by value so the stream is stopped exactly once
    /// when this returns, errors included.
    pub fn run(
        &mut self,
        sdl_context: &sdl2::Sdl,
        stream: StopOnDrop,
        shutdown: &AtomicBool,
    ) -> Result<()> {
        let mut event_pump = sdl_context.event_pump().map_err(|e| eyre!(e))?;

        'running: loop {
            for event in event_pump.poll_iter() {
                if let Event::Quit { .. } = event {
                    info!("Quit event received");
                    break 'running;
                }
            }

            if shutdown.load(Ordering::Acquire) {
                info!("Shutdown requested");
                break;
            }

            let frame = stream.streaming_color_frame();
            if let Some(error) = &frame.error {
                debug!(%error, "showing placeholder frame");
            }
            self.render_frame(&frame)?;

            thread::sleep(self.poll_interval);
        }

        Ok(())
    }
}
