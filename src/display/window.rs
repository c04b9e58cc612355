//! SDL2 viewer window.
//!
//! Renders the sink's latest frame on its own refresh cadence (latest
//! replaces prior, no queueing), surfaces status and FPS in the window
//! title, and maps the keyboard onto the control facade.

use std::time::{SystemTime, UNIX_EPOCH};

use color_eyre::{eyre::eyre, Result};
use sdl2::event::Event;
use sdl2::keyboard::Keycode;
use sdl2::pixels::PixelFormatEnum;
use sdl2::render::{Canvas, TextureCreator};
use sdl2::video::{Window, WindowContext};
use tracing::{info, warn};

use crate::capture::frame::{Frame, PixelFormat};
use crate::capture::session::SessionStatus;
use crate::control::facade::ControlFacade;

pub struct Viewer {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
}

impl Viewer {
    pub fn new(sdl_context: &sdl2::Sdl, width: u32, height: u32) -> Result<Self> {
        let video_subsystem = sdl_context.video().map_err(|e| eyre!(e))?;

        let window = video_subsystem
            .window("Iris", width, height)
            .position_centered()
            .build()?;

        let canvas = window.into_canvas().present_vsync().build()?;
        let texture_creator = canvas.texture_creator();

        Ok(Self {
            canvas,
            texture_creator,
        })
    }

    fn render(&mut self, frame: &Frame) -> Result<()> {
        let mut texture = self
            .texture_creator
            .create_texture_streaming(PixelFormatEnum::RGB24, frame.width, frame.height)
            .map_err(|e| eyre!(e))?;

        texture
            .update(None, &frame.pixels, (frame.width * 3) as usize)
            .map_err(|e| eyre!(e))?;

        self.canvas.clear();
        self.canvas
            .copy(&texture, None, None)
            .map_err(|e| eyre!(e))?;
        self.canvas.present();
        Ok(())
    }

    pub fn run(&mut self, sdl_context: &sdl2::Sdl, facade: &ControlFacade) -> Result<()> {
        let mut event_pump = sdl_context.event_pump().map_err(|e| eyre!(e))?;
        let sink = facade.sink();
        let mut title = String::new();

        'running: loop {
            for event in event_pump.poll_iter() {
                match event {
                    Event::Quit { .. }
                    | Event::KeyDown {
                        keycode: Some(Keycode::Escape),
                        ..
                    } => {
                        info!("quit requested");
                        break 'running;
                    }
                    Event::KeyDown {
                        keycode: Some(key), ..
                    } => handle_key(facade, key),
                    _ => {}
                }
            }

            facade.poll_events();
            let next_title = format!("Iris - {} - {:.1} FPS", facade.status(), facade.fps());
            if next_title != title {
                self.canvas
                    .window_mut()
                    .set_title(&next_title)
                    .map_err(|e| eyre!(e))?;
                title = next_title;
            }

            let frame = sink.latest();
            self.render(&frame)?;
        }

        Ok(())
    }
}

fn handle_key(facade: &ControlFacade, key: Keycode) {
    let config = facade.config();
    let result = match key {
        Keycode::Space => {
            match facade.status() {
                SessionStatus::Idle | SessionStatus::Faulted(_) => facade.start(),
                _ => facade.stop(),
            }
            Ok(())
        }
        Keycode::Up => facade.set_exposure(config.exposure_us * 1.25),
        Keycode::Down => facade.set_exposure(config.exposure_us / 1.25),
        Keycode::Right => facade.set_gain(config.gain_db + 1.0),
        Keycode::Left => facade.set_gain(config.gain_db - 1.0),
        Keycode::RightBracket => facade.set_wb_red(config.wb_red_ratio + 0.05),
        Keycode::LeftBracket => facade.set_wb_red(config.wb_red_ratio - 0.05),
        Keycode::F => {
            let next = PixelFormat::from_index((config.pixel_format.index() + 1) % 7)
                .unwrap_or(PixelFormat::Mono8);
            facade.set_pixel_format(next)
        }
        Keycode::P => {
            if let Err(e) = facade.save_preset() {
                warn!("preset save failed: {e}");
            }
            Ok(())
        }
        Keycode::L => {
            if let Err(e) = facade.load_preset() {
                warn!("preset load failed: {e}");
            }
            Ok(())
        }
        Keycode::R => {
            facade.reset_to_defaults();
            Ok(())
        }
        Keycode::C => {
            let stamp = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            let path = format!("snapshot-{stamp}.png");
            if let Err(e) = facade.save_snapshot(path.as_ref()) {
                warn!("snapshot failed: {e}");
            }
            Ok(())
        }
        _ => Ok(()),
    };
    if let Err(e) = result {
        warn!("control input ignored: {e}");
    }
}
