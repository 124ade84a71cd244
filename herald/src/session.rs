use std::marker::PhantomData;
use std::time::Duration;

use anyhow::{Context, Result};
use smithay_client_toolkit as sctk;
use sctk::compositor::{CompositorHandler, CompositorState};
use sctk::output::{OutputHandler, OutputInfo, OutputState};
use sctk::reexports::calloop::{EventLoop, LoopHandle};
use sctk::reexports::calloop_wayland_source::WaylandSource;
use sctk::registry::{ProvidesRegistryState, RegistryState};
use sctk::registry_handlers;
use sctk::seat::pointer::{PointerEvent, PointerEventKind, PointerHandler};
use sctk::seat::{Capability, SeatHandler, SeatState};
use sctk::shell::wlr_layer::{
    Anchor, KeyboardInteractivity, Layer, LayerShell, LayerShellHandler, LayerSurface,
    LayerSurfaceConfigure,
};
use sctk::shell::WaylandSurface;
use sctk::shm::slot::SlotPool;
use sctk::shm::{Shm, ShmHandler};
use sctk::{
    delegate_compositor, delegate_layer, delegate_output, delegate_pointer,
    delegate_registry, delegate_seat, delegate_shm,
};
use tiny_skia::Pixmap;
use tracing::{debug, warn};
use wayland_client::globals::registry_queue_init;
use wayland_client::protocol::{wl_output, wl_pointer, wl_seat, wl_shm, wl_surface};
use wayland_client::{Connection, Proxy, QueueHandle};

use crate::config::{Colors, Config};
use crate::dismiss::{self, Cause, Dismiss, Dismissible};
use crate::layout::{self, Corner, Geometry, LayoutParams, Line};
use crate::lock::LockGuard;
use crate::text::{Rect, TextRenderer, fill_rect};

/// What gets drawn, already measured.
pub struct Content {
    pub text: TextRenderer,
    pub lines: Vec<Line>,
    pub line_height: u32,
}

// --- Session ---

/// One visible notification. Borrows the lock guard so it cannot outlive it.
pub struct Session<'l> {
    conn: Connection,
    event_loop: EventLoop<'static, Popup>,
    popup: Popup,
    _lock: PhantomData<&'l ()>,
}

impl<'l> Session<'l> {
    pub fn create(
        conn: &Connection, geometry: Geometry, screen: (u32, u32),
        cfg: &Config, colors: Colors, content: Content, _lock: &'l LockGuard<'_>,
    ) -> Result<Self> {
        let (globals, event_queue) = registry_queue_init::<Popup>(conn)
            .context("failed to initialize the Wayland registry")?;
        let qh = event_queue.handle();

        let event_loop: EventLoop<'static, Popup> = EventLoop::try_new()
            .context("failed to create the event loop")?;
        WaylandSource::new(conn.clone(), event_queue)
            .insert(event_loop.handle())
            .map_err(|e| e.error)
            .context("failed to watch the Wayland connection")?;

        let compositor = CompositorState::bind(&globals, &qh).context("wl_compositor not available")?;
        let layer_shell = LayerShell::bind(&globals, &qh).context("compositor lacks wlr-layer-shell")?;
        let shm = Shm::bind(&globals, &qh).context("wl_shm not available")?;

        let surface = compositor.create_surface(&qh);
        let layer = layer_shell.create_layer_surface(&qh, surface, Layer::Overlay, Some("herald"), None);
        let m = geometry.margins(screen);
        layer.set_anchor(anchor(cfg.corner));
        layer.set_margin(m.top, m.right, m.bottom, m.left);
        layer.set_size(geometry.width, geometry.height);
        layer.set_keyboard_interactivity(KeyboardInteractivity::None);
        layer.wl_surface().commit();

        let pool = SlotPool::new((geometry.width * geometry.height * 4) as usize, &shm)
            .context("failed to allocate the shared-memory pool")?;

        dismiss::watch_signals(&event_loop.handle())?;
        debug!(?geometry, ?screen, "surface created");

        let popup = Popup {
            registry_state: RegistryState::new(&globals),
            seat_state: SeatState::new(&globals, &qh),
            output_state: OutputState::new(&globals, &qh),
            shm,
            layer,
            pointer: None,
            pool,
            loop_handle: event_loop.handle(),
            width: geometry.width,
            height: geometry.height,
            shown: false,
            duration: Duration::from_secs(cfg.duration),
            content,
            params: cfg.layout(),
            colors,
            dismiss: Dismiss::new(),
            failure: None,
        };
        Ok(Self { conn: conn.clone(), event_loop, popup, _lock: PhantomData })
    }

    /// Dispatches until dismissed.
    pub fn run(&mut self) -> Result<Cause> {
        loop {
            if let Some(err) = self.popup.failure.take() {
                return Err(err);
            }
            if let Some(cause) = self.popup.dismiss.cause() {
                return Ok(cause);
            }
            self.event_loop
                .dispatch(None, &mut self.popup)
                .context("event loop failed")?;
        }
    }

    /// Destroys the surface and everything drawn into it.
    pub fn destroy(self) -> Result<()> {
        let Self { conn, event_loop, popup, .. } = self;
        let Popup { layer, pointer, pool, .. } = popup;
        if let Some(pointer) = pointer {
            if pointer.version() >= 3 { pointer.release(); }
        }
        drop(layer);
        drop(pool);
        drop(event_loop);
        conn.flush().context("failed to flush the Wayland connection")?;
        debug!("surface destroyed");
        Ok(())
    }
}

fn anchor(corner: Corner) -> Anchor {
    match corner {
        Corner::TopLeft => Anchor::TOP | Anchor::LEFT,
        Corner::TopRight => Anchor::TOP | Anchor::RIGHT,
        Corner::BottomLeft => Anchor::BOTTOM | Anchor::LEFT,
        Corner::BottomRight => Anchor::BOTTOM | Anchor::RIGHT,
    }
}

// --- Popup ---

struct Popup {
    registry_state: RegistryState,
    seat_state: SeatState,
    output_state: OutputState,
    shm: Shm,
    layer: LayerSurface,
    pointer: Option<wl_pointer::WlPointer>,
    pool: SlotPool,
    loop_handle: LoopHandle<'static, Popup>,
    width: u32,
    height: u32,
    shown: bool,
    duration: Duration,
    content: Content,
    params: LayoutParams,
    colors: Colors,
    dismiss: Dismiss,
    failure: Option<anyhow::Error>,
}

impl Dismissible for Popup {
    fn dismissal(&mut self) -> &mut Dismiss { &mut self.dismiss }
}

impl Popup {
    fn fail(&mut self, err: anyhow::Error) {
        if self.failure.is_none() {
            self.failure = Some(err);
        }
    }

    fn paint(&mut self) -> Result<Pixmap> {
        let (w, h) = (self.width, self.height);
        let c = self.colors;
        let bw = self.params.border_width;
        let mut pixmap = Pixmap::new(w, h).context("surface has zero size")?;

        let inner = Rect { x: bw, y: bw, w: w.saturating_sub(2 * bw), h: h.saturating_sub(2 * bw) };
        fill_rect(pixmap.data_mut(), w, h, inner, c.background, c.background_alpha);

        fill_rect(pixmap.data_mut(), w, h, Rect { x: 0, y: 0, w, h: bw }, c.border, 0xff);
        fill_rect(pixmap.data_mut(), w, h, Rect { x: 0, y: h.saturating_sub(bw), w, h: bw }, c.border, 0xff);
        fill_rect(pixmap.data_mut(), w, h, Rect { x: 0, y: 0, w: bw, h }, c.border, 0xff);
        fill_rect(pixmap.data_mut(), w, h, Rect { x: w.saturating_sub(bw), y: 0, w: bw, h }, c.border, 0xff);

        let x = (bw + self.params.padding) as f32;
        let lh = self.content.line_height;
        for (i, line) in self.content.lines.iter().enumerate() {
            let y = layout::line_top(i, lh, &self.params) as f32;
            self.content.text.render(&mut pixmap, line.text(), x, y, inner, c.foreground);
        }
        Ok(pixmap)
    }

    fn draw(&mut self) -> Result<()> {
        let pixmap = self.paint()?;
        let (w, h) = (self.width as i32, self.height as i32);
        let (wl_buf, canvas) = self.pool
            .create_buffer(w, h, w * 4, wl_shm::Format::Argb8888)
            .context("failed to create a shm buffer")?;

        // Copy RGBA premul -> BGRA (ARGB8888 on LE)
        for (dst, src) in canvas.chunks_exact_mut(4).zip(pixmap.data().chunks_exact(4)) {
            dst[0] = src[2];
            dst[1] = src[1];
            dst[2] = src[0];
            dst[3] = src[3];
        }

        wl_buf.attach_to(self.layer.wl_surface()).context("failed to attach buffer")?;
        self.layer.wl_surface().damage_buffer(0, 0, w, h);
        self.layer.wl_surface().commit();
        Ok(())
    }
}

// --- Wayland handler boilerplate ---

impl CompositorHandler for Popup {
    fn scale_factor_changed(&mut self, _: &Connection, _: &QueueHandle<Self>, _: &wl_surface::WlSurface, _: i32) {}
    fn transform_changed(&mut self, _: &Connection, _: &QueueHandle<Self>, _: &wl_surface::WlSurface, _: wl_output::Transform) {}
    fn frame(&mut self, _: &Connection, _: &QueueHandle<Self>, _: &wl_surface::WlSurface, _: u32) {}
    fn surface_enter(&mut self, _: &Connection, _: &QueueHandle<Self>, _: &wl_surface::WlSurface, _: &wl_output::WlOutput) {}
    fn surface_leave(&mut self, _: &Connection, _: &QueueHandle<Self>, _: &wl_surface::WlSurface, _: &wl_output::WlOutput) {}
}

impl OutputHandler for Popup {
    fn output_state(&mut self) -> &mut OutputState { &mut self.output_state }
    fn new_output(&mut self, _: &Connection, _: &QueueHandle<Self>, _: wl_output::WlOutput) {}
    fn update_output(&mut self, _: &Connection, _: &QueueHandle<Self>, _: wl_output::WlOutput) {}
    fn output_destroyed(&mut self, _: &Connection, _: &QueueHandle<Self>, _: wl_output::WlOutput) {}
}

impl SeatHandler for Popup {
    fn seat_state(&mut self) -> &mut SeatState { &mut self.seat_state }
    fn new_seat(&mut self, _: &Connection, _: &QueueHandle<Self>, _: wl_seat::WlSeat) {}
    fn new_capability(&mut self, _: &Connection, qh: &QueueHandle<Self>, seat: wl_seat::WlSeat, capability: Capability) {
        if capability == Capability::Pointer && self.pointer.is_none() {
            match self.seat_state.get_pointer(qh, &seat) {
                Ok(pointer) => self.pointer = Some(pointer),
                Err(e) => warn!("no pointer, only the timeout can dismiss: {e}"),
            }
        }
    }
    fn remove_capability(&mut self, _: &Connection, _: &QueueHandle<Self>, _: wl_seat::WlSeat, capability: Capability) {
        if capability == Capability::Pointer {
            if let Some(pointer) = self.pointer.take() {
                if pointer.version() >= 3 { pointer.release(); }
            }
        }
    }
    fn remove_seat(&mut self, _: &Connection, _: &QueueHandle<Self>, _: wl_seat::WlSeat) {}
}

impl PointerHandler for Popup {
    fn pointer_frame(&mut self, _: &Connection, _: &QueueHandle<Self>, _: &wl_pointer::WlPointer, events: &[PointerEvent]) {
        for event in events {
            if &event.surface != self.layer.wl_surface() { continue; }
            if let PointerEventKind::Press { button, .. } = event.kind {
                debug!(button, "pointer press");
                self.dismiss.dismiss(Cause::Click);
            }
        }
    }
}

impl ShmHandler for Popup {
    fn shm_state(&mut self) -> &mut Shm { &mut self.shm }
}

impl LayerShellHandler for Popup {
    fn closed(&mut self, _: &Connection, _: &QueueHandle<Self>, _: &LayerSurface) {
        self.dismiss.dismiss(Cause::Closed);
    }
    fn configure(&mut self, _: &Connection, _: &QueueHandle<Self>, _: &LayerSurface, configure: LayerSurfaceConfigure, _: u32) {
        if configure.new_size.0 > 0 { self.width = configure.new_size.0; }
        if configure.new_size.1 > 0 { self.height = configure.new_size.1; }
        if !self.shown {
            self.shown = true;
            if let Err(e) = dismiss::arm_timeout(&self.loop_handle, self.duration) {
                self.fail(e);
            }
        }
        if let Err(e) = self.draw() {
            self.fail(e);
        }
    }
}

impl ProvidesRegistryState for Popup {
    fn registry(&mut self) -> &mut RegistryState { &mut self.registry_state }
    registry_handlers![OutputState, SeatState];
}

delegate_compositor!(Popup);
delegate_output!(Popup);
delegate_seat!(Popup);
delegate_pointer!(Popup);
delegate_shm!(Popup);
delegate_layer!(Popup);
delegate_registry!(Popup);

// --- Screen probe ---

struct ScreenProbe {
    registry_state: RegistryState,
    output_state: OutputState,
}

/// Logical size of the first output the compositor advertises.
pub fn probe_screen(conn: &Connection) -> Result<(u32, u32)> {
    let (globals, mut queue) = registry_queue_init::<ScreenProbe>(conn)
        .context("failed to initialize the Wayland registry")?;
    let qh = queue.handle();
    let mut probe = ScreenProbe {
        registry_state: RegistryState::new(&globals),
        output_state: OutputState::new(&globals, &qh),
    };
    // wl_output details and xdg-output sizes arrive over two round trips.
    for _ in 0..2 {
        queue.roundtrip(&mut probe).context("Wayland roundtrip failed")?;
    }
    probe.output_state.outputs()
        .find_map(|o| probe.output_state.info(&o).and_then(|info| screen_size(&info)))
        .context("compositor advertised no usable output")
}

fn screen_size(info: &OutputInfo) -> Option<(u32, u32)> {
    let (w, h) = info.logical_size.or_else(|| {
        let scale = info.scale_factor.max(1);
        info.modes.iter()
            .find(|m| m.current)
            .map(|m| (m.dimensions.0 / scale, m.dimensions.1 / scale))
    })?;
    (w > 0 && h > 0).then_some((w as u32, h as u32))
}

impl OutputHandler for ScreenProbe {
    fn output_state(&mut self) -> &mut OutputState { &mut self.output_state }
    fn new_output(&mut self, _: &Connection, _: &QueueHandle<Self>, _: wl_output::WlOutput) {}
    fn update_output(&mut self, _: &Connection, _: &QueueHandle<Self>, _: wl_output::WlOutput) {}
    fn output_destroyed(&mut self, _: &Connection, _: &QueueHandle<Self>, _: wl_output::WlOutput) {}
}

impl ProvidesRegistryState for ScreenProbe {
    fn registry(&mut self) -> &mut RegistryState { &mut self.registry_state }
    registry_handlers![OutputState];
}

delegate_output!(ScreenProbe);
delegate_registry!(ScreenProbe);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchors_follow_corner() {
        assert_eq!(anchor(Corner::TopLeft), Anchor::TOP | Anchor::LEFT);
        assert_eq!(anchor(Corner::TopRight), Anchor::TOP | Anchor::RIGHT);
        assert_eq!(anchor(Corner::BottomLeft), Anchor::BOTTOM | Anchor::LEFT);
        assert_eq!(anchor(Corner::BottomRight), Anchor::BOTTOM | Anchor::RIGHT);
    }
}
