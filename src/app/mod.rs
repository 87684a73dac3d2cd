use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::OptionExt;
use color_eyre::{Report, Result};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};
use vkscope::{GraphicsContext, VulkanConfig};

pub struct App {
    // Declared before the window so the swapchain and surface go first
    context: Option<GraphicsContext>,
    window: Option<Arc<Window>>,
    event_loop: Option<EventLoop<()>>,

    // State
    error: Option<Report>,
    close_requested: bool,
}

impl App {
    pub fn new() -> Result<Self> {
        let event_loop = EventLoop::new()?;

        Ok(Self {
            context: None,
            window: None,
            event_loop: Some(event_loop),

            error: None,
            close_requested: false,
        })
    }

    pub fn run(mut self) -> Result<()> {
        let event_loop = self
            .event_loop
            .take()
            .ok_or_eyre("Event loop already consumed")?;
        event_loop.run_app(&mut self)?;

        match self.error.take() {
            Some(report) => Err(report),
            None => Ok(()),
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = Arc::new(event_loop.create_window(
            Window::default_attributes().with_title("vkscope"),
        )?);
        let config = VulkanConfig {
            application_name: c"vkscope demo".into(),
            ..Default::default()
        };
        let context = GraphicsContext::new(config, window.as_ref(), extent(window.inner_size()))?;
        if let Some(swapchain) = context.swapchain() {
            log::info!(
                "Presenting {} images of {:?}",
                swapchain.image_count(),
                swapchain.image_extent(),
            );
        }

        self.window = Some(window);
        self.context = Some(context);
        Ok(())
    }

    fn resize(&mut self, size: PhysicalSize<u32>) -> Result<()> {
        if let Some(context) = self.context.as_mut() {
            context.rebuild_swapchain(extent(size))?;
        }
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, report: Report) {
        log::error!("{}", report);
        self.error = Some(report);
        self.context = None;
        event_loop.exit();
    }
}

fn extent(size: PhysicalSize<u32>) -> vk::Extent2D {
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.context.is_some() {
            return;
        }
        if let Err(report) = self.init(event_loop) {
            self.fail(event_loop, report);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent
    ) {
        if self.window.as_ref().map(|window| window.id()) != Some(window_id) {
            return;
        }

        let result = match event {
            WindowEvent::CloseRequested => {
                self.close_requested = true;
                Ok(())
            }
            WindowEvent::Resized(new_size) => self.resize(new_size),
            WindowEvent::ScaleFactorChanged { .. } => {
                match self.window.as_ref().map(|window| window.inner_size()) {
                    Some(size) => self.resize(size),
                    None => Ok(()),
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
                Ok(())
            }
            _ => Ok(()),
        };

        if let Err(report) = result {
            self.fail(event_loop, report);
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.close_requested {
            self.context = None;
            event_loop.exit();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.context = None;
    }
}
