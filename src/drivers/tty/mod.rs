/// Console line discipline is owned by `shell::run` now; this module is
/// left as the driver-layer init hook mouse events get polled alongside.
pub fn init() {
    crate::log_info!("Virtual TTY System initialized.");
}

/// Non-blocking poll for a left-click mouse event, logged rather than
/// acted on — there is no windowing layer for it to drive (§1 non-goals).
pub fn poll_mouse() {
    if let Some(mouse_event) = crate::drivers::mouse::try_read_event() {
        if mouse_event.left_button {
            crate::log_info!("mouse: left click at x={}, y={}", mouse_event.x_movement, mouse_event.y_movement);
        }
    }
}
