use std::sync::Arc;

use color_eyre::eyre::Report;
use color_eyre::Result;
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};

use crate::renderer::config::RenderConfig;
use crate::renderer::Renderer;

pub struct App {
    config: RenderConfig,
    window: Option<Arc<Window>>,
    renderer: Option<Renderer>,

    // State
    close_requested: bool,
    fatal: Option<Report>,
}

impl App {
    pub fn new() -> Result<Self> {
        Ok(Self {
            config: RenderConfig::default(),
            window: None,
            renderer: None,

            close_requested: false,
            fatal: None,
        })
    }

    pub fn run(mut self) -> Result<()> {
        let event_loop = EventLoop::new()?;
        event_loop.set_control_flow(ControlFlow::Poll);
        event_loop.run_app(&mut self)?;

        match self.fatal.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Every renderer failure is fatal: record it and leave the event loop.
    fn abort(&mut self, event_loop: &ActiveEventLoop, err: Report) {
        log::error!("fatal renderer error: {err:?}");
        self.fatal = Some(err);
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            let attributes = Window::default_attributes()
                .with_title(self.config.window_title.clone())
                .with_inner_size(LogicalSize::new(
                    self.config.window_width,
                    self.config.window_height,
                ))
                .with_resizable(false);
            match event_loop.create_window(attributes) {
                Ok(window) => self.window = Some(Arc::new(window)),
                Err(err) => return self.abort(event_loop, err.into()),
            }
        }

        let Some(window) = self.window.clone() else {
            return;
        };
        if self.renderer.is_none() {
            match Renderer::new(window, &self.config) {
                Ok(renderer) => self.renderer = Some(renderer),
                Err(err) => self.abort(event_loop, err),
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if Some(window_id) != self.window.as_ref().map(|window| window.id()) {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                self.close_requested = true;
            }
            WindowEvent::RedrawRequested => {
                if let Some(renderer) = self.renderer.as_mut() {
                    if let Err(err) = renderer.draw() {
                        self.abort(event_loop, err);
                    }
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key: Key::Named(NamedKey::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                self.close_requested = true;
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.close_requested {
            event_loop.exit();
            return;
        }

        // One frame per loop iteration until told to stop.
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // Renderer teardown waits for the device to go idle; the window must
        // outlive the surface, so it is released afterwards.
        self.renderer = None;
        self.window = None;
    }
}
