//! SDL2 Window Display Module
//! Creates an SDL2 window and renders received frames with their telemetry.
//! SDL2 has no text rendering without the ttf extension, so the overlay goes
//! to the window title while the frame gets simple status markers.

use color_eyre::{eyre::eyre, Result};
use sdl2::event::Event;
use sdl2::keyboard::Scancode;
use sdl2::pixels::{Color, PixelFormatEnum};
use sdl2::rect::Rect;
use sdl2::render::{Canvas, TextureCreator};
use sdl2::video::{Window, WindowContext};
use sdl2::EventPump;
use tracing::info;

use crate::capture::RawFrame;
use crate::display::{DisplaySink, Overlay};
use crate::error::StreamError;
use crate::DisplayConfig;

const MARKER_SIZE: u32 = 16;

/// SDL2 Window Display
/// Owns the SDL context, window canvas and event pump. Must live on the
/// thread that created it.
pub struct Sdl2Display {
    _sdl: sdl2::Sdl,
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    event_pump: EventPump,
    quit_requested: bool,
}

impl Sdl2Display {
    pub fn new(config: &DisplayConfig) -> Result<Self> {
        let sdl = sdl2::init().map_err(|e| eyre!(e))?;
        let video_subsystem = sdl.video().map_err(|e| eyre!(e))?;

        let window = video_subsystem
            .window(&config.title, config.width, config.height)
            .position_centered()
            .resizable()
            .build()?;

        let canvas = window.into_canvas().present_vsync().build()?;
        let texture_creator = canvas.texture_creator();
        let event_pump = sdl.event_pump().map_err(|e| eyre!(e))?;

        info!("SDL2 display {}x{} ready", config.width, config.height);

        Ok(Self {
            _sdl: sdl,
            canvas,
            texture_creator,
            event_pump,
            quit_requested: false,
        })
    }

    fn render(&mut self, frame: &RawFrame, overlay: &Overlay) -> Result<()> {
        let rgb_data = frame.to_rgb24();

        let mut texture = self
            .texture_creator
            .create_texture_streaming(PixelFormatEnum::RGB24, frame.width, frame.height)
            .map_err(|e| eyre!(e))?;

        texture
            .update(None, &rgb_data, (frame.width * 3) as usize)
            .map_err(|e| eyre!(e))?;

        self.canvas.clear();
        self.canvas
            .copy(&texture, None, None)
            .map_err(|e| eyre!(e))?;

        // Top-left: green when nothing was lost, red otherwise.
        let status = if overlay.lost > 0 {
            Color::RGB(255, 0, 0)
        } else {
            Color::RGB(0, 255, 0)
        };
        self.canvas.set_draw_color(status);
        self.canvas
            .fill_rect(Rect::new(0, 0, MARKER_SIZE, MARKER_SIZE))
            .map_err(|e| eyre!(e))?;

        if overlay.is_keyframe {
            let (w, _) = self.canvas.output_size().map_err(|e| eyre!(e))?;
            self.canvas.set_draw_color(Color::RGB(255, 0, 0));
            self.canvas
                .fill_rect(Rect::new(
                    w.saturating_sub(MARKER_SIZE) as i32,
                    0,
                    MARKER_SIZE,
                    MARKER_SIZE,
                ))
                .map_err(|e| eyre!(e))?;
        }
        self.canvas.set_draw_color(Color::RGB(0, 0, 0));

        self.canvas.window_mut().set_title(&overlay.to_string())?;
        self.canvas.present();
        Ok(())
    }
}

impl DisplaySink for Sdl2Display {
    fn show(&mut self, frame: &RawFrame, overlay: &Overlay) -> crate::Result<()> {
        self.render(frame, overlay)
            .map_err(|e| StreamError::Display(format!("render failed: {e}")))
    }

    fn poll_quit_requested(&mut self) -> bool {
        for event in self.event_pump.poll_iter() {
            match event {
                Event::Quit { .. }
                | Event::KeyDown {
                    scancode: Some(Scancode::Q | Scancode::Escape),
                    ..
                } => {
                    info!("Quit event received");
                    self.quit_requested = true;
                }
                _ => {}
            }
        }
        self.quit_requested
    }

    fn close(&mut self) {
        self.canvas.window_mut().hide();
        info!("SDL2 display closed");
    }
}
