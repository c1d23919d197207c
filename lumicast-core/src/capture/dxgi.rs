//! DXGI Desktop Duplication capture with GPU downscaling.
//!
//! Uses the Direct3D 11 Desktop Duplication API to obtain the composited
//! desktop as a GPU texture, shrinks it on the GPU by generating a mip
//! chain, and copies the requested mip level into a small CPU-readable
//! staging texture.
//!
//! # Platform
//!
//! This module is **Windows-only**. On other platforms the session type is
//! still defined but `open` fails with
//! [`GrabError::DeviceEnumeration`].

use crate::capture::CaptureDimensions;
#[cfg(not(target_os = "windows"))]
use crate::capture::CaptureSettings;
#[cfg(not(target_os = "windows"))]
use crate::capture::engine::CaptureSession;
#[cfg(not(target_os = "windows"))]
use crate::capture::frame::Frame;
#[cfg(not(target_os = "windows"))]
use crate::error::GrabError;

/// A live duplication of one monitor.
///
/// Resource chain, in acquisition order:
///
/// 1. DXGI factory → adapter → output (must be attached to the desktop).
/// 2. D3D11 device + immediate context on that adapter.
/// 3. The output duplication. Its mode size (unrotated) is the physical
///    size used below.
/// 4. CPU-readable staging texture at the downscaled size.
/// 5. When scaling: a render-target/shader-resource texture at the
///    physical size with `1 + log2(scale)` mip levels, plus its view.
///
/// On each [`acquire`](CaptureSession::acquire):
///
/// - `AcquireNextFrame` (blocks up to `timeout_ms`).
/// - Scaling: copy to mip 0, `GenerateMips`, copy mip `log2(scale)` to
///   staging. Otherwise copy straight to staging.
/// - Map, pack BGRA → RGB, unmap, release.
///
/// # Safety
///
/// All unsafe FFI calls are confined to this struct. Fields drop with the
/// duplication first and the adapter last.
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
pub struct DuplicationSession {
    dims: CaptureDimensions,

    // ── Platform handles (Windows only) ──────────────────────
    #[cfg(target_os = "windows")]
    duplication: windows::Win32::Graphics::Dxgi::IDXGIOutputDuplication,
    #[cfg(target_os = "windows")]
    scale_view: Option<windows::Win32::Graphics::Direct3D11::ID3D11ShaderResourceView>,
    #[cfg(target_os = "windows")]
    scale_texture: Option<windows::Win32::Graphics::Direct3D11::ID3D11Texture2D>,
    #[cfg(target_os = "windows")]
    staging_texture: windows::Win32::Graphics::Direct3D11::ID3D11Texture2D,
    #[cfg(target_os = "windows")]
    context: windows::Win32::Graphics::Direct3D11::ID3D11DeviceContext,
    #[cfg(target_os = "windows")]
    _device: windows::Win32::Graphics::Direct3D11::ID3D11Device,
    #[cfg(target_os = "windows")]
    _output: windows::Win32::Graphics::Dxgi::IDXGIOutput1,
    #[cfg(target_os = "windows")]
    _adapter: windows::Win32::Graphics::Dxgi::IDXGIAdapter1,
    #[cfg(target_os = "windows")]
    mip_level: u32,
}

// ── Windows implementation ───────────────────────────────────────

#[cfg(target_os = "windows")]
mod platform {
    use super::*;
    use crate::capture::engine::CaptureSession;
    use crate::capture::frame::{Frame, PixelFormat, SurfaceLayout, pack_rgb};
    use crate::capture::{CaptureSettings, monitors};
    use crate::error::GrabError;
    use windows::{
        Win32::Foundation::E_ACCESSDENIED,
        Win32::Graphics::{
            Direct3D::D3D_DRIVER_TYPE_UNKNOWN,
            Direct3D11::*,
            Dxgi::{Common::*, *},
        },
        core::Interface,
    };

    /// Map a native failure onto the capture error taxonomy.
    pub(crate) fn classify(op: &str, e: windows::core::Error) -> GrabError {
        let code = e.code();
        let msg = format!("{op} failed: {e}");
        if code == DXGI_ERROR_ACCESS_LOST
            || code == E_ACCESSDENIED
            || code == DXGI_ERROR_DEVICE_REMOVED
            || code == DXGI_ERROR_DEVICE_RESET
            || code == DXGI_ERROR_SESSION_DISCONNECTED
            || code == DXGI_ERROR_NOT_CURRENTLY_AVAILABLE
            || code == DXGI_ERROR_INVALID_CALL
        {
            GrabError::DeviceLost(msg)
        } else if code == DXGI_ERROR_NOT_FOUND {
            GrabError::DeviceEnumeration(msg)
        } else {
            GrabError::UnexpectedCapture(msg)
        }
    }

    /// Releases the acquired desktop frame when dropped.
    struct AcquiredFrame<'a>(&'a IDXGIOutputDuplication);

    impl Drop for AcquiredFrame<'_> {
        fn drop(&mut self) {
            // Never replaces the capture result.
            let _ = unsafe { self.0.ReleaseFrame() };
        }
    }

    /// Unmaps the staging texture when dropped.
    struct MappedStaging<'a> {
        context: &'a ID3D11DeviceContext,
        texture: &'a ID3D11Texture2D,
    }

    impl Drop for MappedStaging<'_> {
        fn drop(&mut self) {
            unsafe { self.context.Unmap(self.texture, 0) };
        }
    }

    fn texture_desc(width: u32, height: u32) -> D3D11_TEXTURE2D_DESC {
        D3D11_TEXTURE2D_DESC {
            Width: width,
            Height: height,
            MipLevels: 1,
            ArraySize: 1,
            Format: DXGI_FORMAT_B8G8R8A8_UNORM,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: 0,
            CPUAccessFlags: 0,
            MiscFlags: 0,
        }
    }

    impl CaptureSession for DuplicationSession {
        const NAME: &'static str = "dxgi";

        fn open(settings: &CaptureSettings) -> Result<Self, GrabError> {
            unsafe { Self::open_dxgi(settings) }
        }

        fn dimensions(&self) -> CaptureDimensions {
            self.dims
        }

        fn acquire(&mut self, timeout_ms: u32) -> Result<Option<Frame>, GrabError> {
            unsafe { self.acquire_inner(timeout_ms) }
        }
    }

    impl DuplicationSession {
        unsafe fn open_dxgi(settings: &CaptureSettings) -> Result<Self, GrabError> {
            // 1. Adapter and output, which must be on the desktop.
            let (adapter, output) =
                unsafe { monitors::open_output(settings.adapter_index, settings.monitor_index)? };
            let desc = unsafe { output.GetDesc() }.map_err(|e| classify("IDXGIOutput::GetDesc", e))?;
            let bounds = desc.DesktopCoordinates;
            monitors::desktop_extent(
                settings.monitor_index,
                desc.AttachedToDesktop.as_bool(),
                bounds.right - bounds.left,
                bounds.bottom - bounds.top,
            )?;

            // 2. D3D11 device + immediate context bound to that adapter.
            let base_adapter: IDXGIAdapter = adapter
                .cast()
                .map_err(|e| classify("cast to IDXGIAdapter", e))?;
            let mut device = None;
            let mut context = None;
            unsafe {
                D3D11CreateDevice(
                    &base_adapter,
                    D3D_DRIVER_TYPE_UNKNOWN,
                    None,
                    D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                    None, // feature levels: let the driver decide
                    D3D11_SDK_VERSION,
                    Some(&mut device),
                    None,
                    Some(&mut context),
                )
                .map_err(|e| classify("D3D11CreateDevice", e))?;
            }
            let device: ID3D11Device = device
                .ok_or_else(|| GrabError::UnexpectedCapture("D3D11 device is None".into()))?;
            let context: ID3D11DeviceContext = context
                .ok_or_else(|| GrabError::UnexpectedCapture("D3D11 context is None".into()))?;

            // 3. Duplicate the output. Acquired surfaces use the unrotated
            //    mode size, so every texture below is sized from it.
            let duplication = unsafe {
                output
                    .DuplicateOutput(&device)
                    .map_err(|e| classify("DuplicateOutput", e))?
            };
            let mode = unsafe { duplication.GetDesc() }.ModeDesc;
            let (physical_width, physical_height) = (mode.Width, mode.Height);
            let dims =
                CaptureDimensions::scaled(physical_width, physical_height, settings.scaling_factor)?;

            // 4. CPU-readable staging texture at the downscaled size.
            let staging_desc = D3D11_TEXTURE2D_DESC {
                Usage: D3D11_USAGE_STAGING,
                CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
                ..texture_desc(dims.width, dims.height)
            };
            let mut staging_texture = None;
            unsafe {
                device
                    .CreateTexture2D(&staging_desc, None, Some(&mut staging_texture))
                    .map_err(|e| classify("CreateTexture2D (staging)", e))?;
            }
            let staging_texture = staging_texture
                .ok_or_else(|| GrabError::UnexpectedCapture("staging texture is None".into()))?;

            // 5. Mip-chain texture at the mode size.
            let (scale_texture, scale_view) = if settings.is_scaling() {
                let scale_desc = D3D11_TEXTURE2D_DESC {
                    MipLevels: settings.mip_levels(),
                    BindFlags: (D3D11_BIND_RENDER_TARGET.0 | D3D11_BIND_SHADER_RESOURCE.0) as u32,
                    MiscFlags: D3D11_RESOURCE_MISC_GENERATE_MIPS.0 as u32,
                    ..texture_desc(physical_width, physical_height)
                };
                let mut texture = None;
                unsafe {
                    device
                        .CreateTexture2D(&scale_desc, None, Some(&mut texture))
                        .map_err(|e| classify("CreateTexture2D (mip chain)", e))?;
                }
                let texture: ID3D11Texture2D = texture
                    .ok_or_else(|| GrabError::UnexpectedCapture("mip texture is None".into()))?;

                let mut view = None;
                unsafe {
                    device
                        .CreateShaderResourceView(&texture, None, Some(&mut view))
                        .map_err(|e| classify("CreateShaderResourceView", e))?;
                }
                let view = view.ok_or_else(|| {
                    GrabError::UnexpectedCapture("shader resource view is None".into())
                })?;
                (Some(texture), Some(view))
            } else {
                (None, None)
            };

            Ok(Self {
                dims,
                duplication,
                scale_view,
                scale_texture,
                staging_texture,
                context,
                _device: device,
                _output: output,
                _adapter: adapter,
                mip_level: settings.mip_level(),
            })
        }

        unsafe fn acquire_inner(&mut self, timeout_ms: u32) -> Result<Option<Frame>, GrabError> {
            let mut frame_info = DXGI_OUTDUPL_FRAME_INFO::default();
            let mut resource = None;

            match unsafe {
                self.duplication
                    .AcquireNextFrame(timeout_ms, &mut frame_info, &mut resource)
            } {
                Ok(()) => {}
                Err(e) if e.code() == DXGI_ERROR_WAIT_TIMEOUT => return Ok(None),
                Err(e) => return Err(classify("AcquireNextFrame", e)),
            }
            let acquired = AcquiredFrame(&self.duplication);

            let resource: IDXGIResource = resource
                .ok_or_else(|| GrabError::UnexpectedCapture("acquired resource is None".into()))?;
            let desktop: ID3D11Texture2D = resource
                .cast()
                .map_err(|e| classify("cast to ID3D11Texture2D", e))?;

            // GPU work: downscale through the mip chain, or copy as-is.
            unsafe {
                match (&self.scale_texture, &self.scale_view) {
                    (Some(scale_texture), Some(scale_view)) => {
                        self.context
                            .CopySubresourceRegion(scale_texture, 0, 0, 0, 0, &desktop, 0, None);
                        self.context.GenerateMips(scale_view);
                        self.context.CopySubresourceRegion(
                            &self.staging_texture,
                            0,
                            0,
                            0,
                            0,
                            scale_texture,
                            self.mip_level,
                            None,
                        );
                    }
                    _ => self.context.CopyResource(&self.staging_texture, &desktop),
                }
            }

            // Release the DXGI frame as early as possible.
            drop(desktop);
            drop(acquired);

            // Map the staging texture for CPU read.
            let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
            unsafe {
                self.context
                    .Map(&self.staging_texture, 0, D3D11_MAP_READ, 0, Some(&mut mapped))
                    .map_err(|e| classify("Map", e))?;
            }
            let _mapping = MappedStaging {
                context: &self.context,
                texture: &self.staging_texture,
            };

            let layout = SurfaceLayout {
                width: self.dims.width,
                height: self.dims.height,
                stride: mapped.RowPitch as usize,
                format: PixelFormat::Bgra8,
            };
            let src = unsafe {
                std::slice::from_raw_parts(mapped.pData as *const u8, layout.min_source_len())
            };
            let rgb = pack_rgb(src, layout)?;
            Frame::from_rgb(self.dims.width, self.dims.height, rgb).map(Some)
        }
    }
}

#[cfg(target_os = "windows")]
pub(crate) use platform::classify;

#[cfg(all(test, target_os = "windows"))]
mod windows_tests {
    use super::*;
    use crate::capture::CaptureSettings;
    use crate::capture::engine::CaptureSession;
    use crate::error::GrabError;

    // Sessions follow the duplication's mode size, which stays unrotated
    // on portrait monitors. Skipped when no desktop can be duplicated.
    #[test]
    fn session_is_sized_from_the_duplication_mode() {
        for scaling_factor in [1, 8] {
            let settings = CaptureSettings {
                scaling_factor,
                ..Default::default()
            };
            let mut session = match DuplicationSession::open(&settings) {
                Ok(session) => session,
                Err(GrabError::DeviceEnumeration(_) | GrabError::DeviceLost(_)) => return,
                Err(e) => panic!("unexpected open failure: {e}"),
            };
            let mode = unsafe { session.duplication.GetDesc() }.ModeDesc;
            assert_eq!(
                session.dimensions(),
                CaptureDimensions {
                    width: mode.Width / scaling_factor,
                    height: mode.Height / scaling_factor,
                }
            );
            if let Ok(Some(frame)) = session.acquire(500) {
                assert_eq!(frame.dimensions(), session.dimensions());
            }
        }
    }
}

// ── Non-Windows stub ─────────────────────────────────────────────

#[cfg(not(target_os = "windows"))]
impl CaptureSession for DuplicationSession {
    const NAME: &'static str = "dxgi";

    /// DXGI is only available on Windows.
    fn open(_settings: &CaptureSettings) -> Result<Self, GrabError> {
        Err(GrabError::DeviceEnumeration(
            "DXGI Desktop Duplication is only available on Windows".into(),
        ))
    }

    fn dimensions(&self) -> CaptureDimensions {
        self.dims
    }

    fn acquire(&mut self, _timeout_ms: u32) -> Result<Option<Frame>, GrabError> {
        Err(GrabError::DeviceLost("Not supported on this platform".into()))
    }
}
