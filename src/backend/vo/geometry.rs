//! Placement of the video plane on screen

use crate::backend::video::ImageParams;
use crate::utils::Rectangle;

/// Anamorphic PAL/NTSC field sizes which are always stretched to the whole screen
pub fn is_anisotropic_sd(width: i32, height: i32) -> bool {
    width == 720 && (height == 288 || height == 240)
}

/// Half-height 1080 line content, shown line doubled from the top of the screen
pub fn is_half_height_1080(width: i32, height: i32) -> bool {
    width == 1920 && height == 540
}

/// Source and letterboxed destination rectangle of a stream shown on `screen`
///
/// The pixel aspect of the stream is respected, the display is assumed to have square pixels.
pub fn src_dst_rects(params: &ImageParams, screen: (u32, u32)) -> (Rectangle, Rectangle) {
    let src = Rectangle::from_size(params.width as i32, params.height as i32);
    let (par_w, par_h) = params.pixel_aspect;
    let display_w = params.width as f64 * par_w.max(1) as f64 / par_h.max(1) as f64;
    let display_h = params.height as f64;
    let (screen_w, screen_h) = (screen.0 as f64, screen.1 as f64);
    if display_w <= 0.0 || display_h <= 0.0 {
        return (src, Rectangle::from_size(screen.0 as i32, screen.1 as i32));
    }

    let scale = (screen_w / display_w).min(screen_h / display_h);
    let w = (display_w * scale).round() as i32;
    let h = (display_h * scale).round() as i32;
    let dst = Rectangle::new((screen.0 as i32 - w) / 2, (screen.1 as i32 - h) / 2, w, h);
    (src, dst)
}

/// Where the video plane scans out `src` on a screen of `screen` pixels
///
/// `dst` is the letterboxed destination from [`src_dst_rects`]. The result is even aligned.
pub fn video_plane_rect(src: Rectangle, dst: Rectangle, screen: (u32, u32)) -> Rectangle {
    let (screen_w, screen_h) = (screen.0 as i32, screen.1 as i32);

    let rect = if is_anisotropic_sd(src.width, src.height) {
        Rectangle::from_size(screen_w, screen_h)
    } else if is_half_height_1080(src.width, src.height) {
        Rectangle::new(dst.x, 0, dst.width, dst.height * 2)
    } else {
        let rw = src.width as f32 / screen_w as f32;
        let rh = src.height as f32 / screen_h as f32;
        if rw >= rh {
            let h = (screen_h as f32 * (rh / rw)) as i32;
            Rectangle::new(0, (screen_h - h) / 2, screen_w, h)
        } else {
            let w = (screen_w as f32 * (rw / rh)) as i32;
            Rectangle::new((screen_w - w) / 2, 0, w, screen_h)
        }
    };
    rect.align_down(2)
}
