//! Legacy GDI capture.
//!
//! Copies the monitor rectangle from the screen DC into a memory bitmap
//! with `StretchBlt` in `HALFTONE` mode, which performs the downscale on
//! the CPU, then reads the bitmap back as top-down 32-bit BGRA.
//!
//! Monitor bounds are resolved through DXGI so `adapter_index` and
//! `monitor_index` mean the same thing for both capture methods.

use crate::capture::CaptureDimensions;
#[cfg(not(target_os = "windows"))]
use crate::capture::CaptureSettings;
#[cfg(not(target_os = "windows"))]
use crate::capture::engine::CaptureSession;
#[cfg(not(target_os = "windows"))]
use crate::capture::frame::Frame;
#[cfg(not(target_os = "windows"))]
use crate::error::GrabError;

/// GDI handles for one monitor. Every capture returns fresh content, so
/// `acquire` never reports a timeout.
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
pub struct GdiSession {
    dims: CaptureDimensions,

    #[cfg(target_os = "windows")]
    handles: platform::GdiHandles,
    #[cfg(target_os = "windows")]
    source: windows::Win32::Foundation::RECT,
    #[cfg(target_os = "windows")]
    scratch: Vec<u8>,
}

// ── Windows implementation ───────────────────────────────────────

#[cfg(target_os = "windows")]
mod platform {
    use super::*;
    use crate::capture::engine::CaptureSession;
    use crate::capture::frame::{Frame, PixelFormat, SurfaceLayout, pack_rgb};
    use crate::capture::{CaptureSettings, monitors};
    use crate::capture::dxgi::classify;
    use crate::error::GrabError;
    use windows::Win32::Foundation::HWND;
    use windows::Win32::Graphics::Gdi::*;

    /// Owns the screen DC, the memory DC and its bitmap. Null handles are
    /// skipped on drop, so a half-built set cleans up after itself.
    #[derive(Default)]
    pub(super) struct GdiHandles {
        screen_dc: HDC,
        mem_dc: HDC,
        bitmap: HBITMAP,
        previous: HGDIOBJ,
    }

    impl Drop for GdiHandles {
        fn drop(&mut self) {
            unsafe {
                if !self.previous.is_invalid() {
                    SelectObject(self.mem_dc, self.previous);
                }
                if !self.bitmap.is_invalid() {
                    let _ = DeleteObject(self.bitmap);
                }
                if !self.mem_dc.is_invalid() {
                    let _ = DeleteDC(self.mem_dc);
                }
                if !self.screen_dc.is_invalid() {
                    ReleaseDC(HWND::default(), self.screen_dc);
                }
            }
        }
    }

    impl CaptureSession for GdiSession {
        const NAME: &'static str = "gdi";

        fn open(settings: &CaptureSettings) -> Result<Self, GrabError> {
            unsafe { Self::open_gdi(settings) }
        }

        fn dimensions(&self) -> CaptureDimensions {
            self.dims
        }

        fn acquire(&mut self, _timeout_ms: u32) -> Result<Option<Frame>, GrabError> {
            unsafe { self.acquire_inner() }.map(Some)
        }
    }

    impl GdiSession {
        unsafe fn open_gdi(settings: &CaptureSettings) -> Result<Self, GrabError> {
            let (_adapter, output) =
                unsafe { monitors::open_output(settings.adapter_index, settings.monitor_index)? };
            let desc =
                unsafe { output.GetDesc() }.map_err(|e| classify("IDXGIOutput::GetDesc", e))?;
            let source = desc.DesktopCoordinates;
            let (width, height) = monitors::desktop_extent(
                settings.monitor_index,
                desc.AttachedToDesktop.as_bool(),
                source.right - source.left,
                source.bottom - source.top,
            )?;
            let dims = CaptureDimensions::scaled(width, height, settings.scaling_factor)?;

            let mut handles = GdiHandles::default();
            unsafe {
                handles.screen_dc = GetDC(HWND::default());
                if handles.screen_dc.is_invalid() {
                    return Err(GrabError::UnexpectedCapture("GetDC failed".into()));
                }
                handles.mem_dc = CreateCompatibleDC(handles.screen_dc);
                if handles.mem_dc.is_invalid() {
                    return Err(GrabError::UnexpectedCapture("CreateCompatibleDC failed".into()));
                }
                handles.bitmap = CreateCompatibleBitmap(
                    handles.screen_dc,
                    dims.width as i32,
                    dims.height as i32,
                );
                if handles.bitmap.is_invalid() {
                    return Err(GrabError::UnexpectedCapture(
                        "CreateCompatibleBitmap failed".into(),
                    ));
                }
                handles.previous = SelectObject(handles.mem_dc, handles.bitmap);
                SetStretchBltMode(handles.mem_dc, HALFTONE);
            }

            Ok(Self {
                dims,
                handles,
                source,
                scratch: vec![0; dims.width as usize * dims.height as usize * 4],
            })
        }

        unsafe fn acquire_inner(&mut self) -> Result<Frame, GrabError> {
            let (w, h) = (self.dims.width as i32, self.dims.height as i32);
            let src = self.source;

            let copied = unsafe {
                StretchBlt(
                    self.handles.mem_dc,
                    0,
                    0,
                    w,
                    h,
                    self.handles.screen_dc,
                    src.left,
                    src.top,
                    src.right - src.left,
                    src.bottom - src.top,
                    SRCCOPY,
                )
            };
            if !copied.as_bool() {
                return Err(GrabError::DeviceLost(
                    "StretchBlt failed; desktop unavailable".into(),
                ));
            }

            let mut info = BITMAPINFO {
                bmiHeader: BITMAPINFOHEADER {
                    biSize: std::mem::size_of::<BITMAPINFOHEADER>() as u32,
                    biWidth: w,
                    // Negative height = top-down rows.
                    biHeight: -h,
                    biPlanes: 1,
                    biBitCount: 32,
                    biCompression: BI_RGB.0,
                    ..Default::default()
                },
                ..Default::default()
            };
            let lines = unsafe {
                GetDIBits(
                    self.handles.mem_dc,
                    self.handles.bitmap,
                    0,
                    self.dims.height,
                    Some(self.scratch.as_mut_ptr().cast()),
                    &mut info,
                    DIB_RGB_COLORS,
                )
            };
            if lines != h {
                return Err(GrabError::UnexpectedCapture(format!(
                    "GetDIBits returned {lines} of {h} rows"
                )));
            }

            let layout = SurfaceLayout {
                width: self.dims.width,
                height: self.dims.height,
                stride: self.dims.width as usize * 4,
                format: PixelFormat::Bgra8,
            };
            let rgb = pack_rgb(&self.scratch, layout)?;
            Frame::from_rgb(self.dims.width, self.dims.height, rgb)
        }
    }
}

// ── Non-Windows stub ─────────────────────────────────────────────

#[cfg(not(target_os = "windows"))]
impl CaptureSession for GdiSession {
    const NAME: &'static str = "gdi";

    fn open(_settings: &CaptureSettings) -> Result<Self, GrabError> {
        Err(GrabError::DeviceEnumeration(
            "GDI capture is only available on Windows".into(),
        ))
    }

    fn dimensions(&self) -> CaptureDimensions {
        self.dims
    }

    fn acquire(&mut self, _timeout_ms: u32) -> Result<Option<Frame>, GrabError> {
        Err(GrabError::DeviceLost("Not supported on this platform".into()))
    }
}
