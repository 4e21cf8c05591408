use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::{eyre, Report};
use color_eyre::Result;
use glam::Vec4;
use winit::application::ApplicationHandler;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};
use kiln::{Renderer, RendererRing, RenderConfig};

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let config = RenderConfig {
        clear_color: Vec4::new(1.0, 0.0, 0.0, 1.0),
        ..Default::default()
    };

    if std::env::var("KILN_WINDOWED").is_ok_and(|value| value == "1") {
        run_windowed(config)
    } else {
        let frames = match std::env::var("KILN_FRAMES") {
            Ok(value) => value.parse::<u32>()?,
            Err(_) => 3,
        };
        run_headless(config, frames)
    }
}

fn run_headless(config: RenderConfig, frames: u32) -> Result<()> {
    let mut renderer = Renderer::new(config, None)?;
    for _ in 0..frames {
        renderer.draw()?;
    }

    if let RendererRing::Headless(ring) = renderer.ring_mut() {
        ring.wait_idle()?;
        let image = ring
            .color_image_mut(0)
            .ok_or_else(|| eyre!("headless ring has no color image"))?;
        let texels = image.read_layer(0)?;
        log::info!(
            "Rendered {} frames, first texel of frame 0: {:?}",
            frames,
            &texels[..texels.len().min(4)],
        );
    }
    Ok(())
}

fn run_windowed(config: RenderConfig) -> Result<()> {
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    match app.error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

struct App {
    config: RenderConfig,
    window: Option<Arc<Window>>,
    renderer: Option<Renderer>,
    error: Option<Report>,
}

impl App {
    fn new(config: RenderConfig) -> Self {
        Self {
            config,
            window: None,
            renderer: None,
            error: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: Report) {
        log::error!("{:?}", error);
        self.error = Some(error);
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            let attributes = Window::default_attributes().with_title("kiln");
            match event_loop.create_window(attributes) {
                Ok(window) => self.window = Some(Arc::new(window)),
                Err(e) => return self.fail(event_loop, e.into()),
            }
        }

        if self.renderer.is_none() {
            match Renderer::new(self.config.clone(), self.window.clone()) {
                Ok(renderer) => self.renderer = Some(renderer),
                Err(e) => self.fail(event_loop, e),
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if self.window.as_ref().map(|window| window.id()) != Some(window_id) {
            return;
        }
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };

        match event {
            WindowEvent::CloseRequested
            | WindowEvent::KeyboardInput {
                event:
                KeyEvent {
                    logical_key: Key::Named(NamedKey::Escape),
                    state: ElementState::Pressed,
                    ..
                },
                ..
            } => {
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                let extent = vk::Extent2D {
                    width: size.width,
                    height: size.height,
                };
                let resized = match renderer.ring_mut() {
                    RendererRing::Presentable(ring) => kiln::FrameRing::update_extent(ring, extent),
                    RendererRing::Headless(_) => Ok(false),
                };
                if let Err(e) = resized {
                    self.fail(event_loop, e);
                }
            }
            WindowEvent::ScaleFactorChanged { .. } => {
                renderer.request_resize();
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = renderer.draw() {
                    self.fail(event_loop, e);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // The renderer waits for the device before releasing anything the window surface uses
        self.renderer = None;
    }
}
