//! Adapter and monitor enumeration.
//!
//! Used by configuration tooling (`--list-monitors`) to show which
//! `adapter_index` / `monitor_index` pairs exist. Enumeration creates its
//! own DXGI factory and never touches a running capture session.

use std::fmt;

use serde::Serialize;

use crate::error::GrabError;

/// One monitor attached to an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputInfo {
    pub index: u32,
    /// GDI device name, e.g. `\\.\DISPLAY1`.
    pub device_name: String,
    pub width: u32,
    pub height: u32,
    /// Whether the output is part of the desktop.
    pub attached: bool,
}

/// One graphics adapter and its monitors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdapterInfo {
    pub index: u32,
    pub description: String,
    pub outputs: Vec<OutputInfo>,
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "adapter {}: {}", self.index, self.description)?;
        if self.outputs.is_empty() {
            writeln!(f, "  (no outputs)")?;
        }
        for out in &self.outputs {
            writeln!(
                f,
                "  monitor {}: {} {}x{}{}",
                out.index,
                out.device_name,
                out.width,
                out.height,
                if out.attached { "" } else { " (detached)" }
            )?;
        }
        Ok(())
    }
}

/// Size of an output on the desktop.
///
/// An output that is enumerated but detached, or that reports an empty
/// rectangle, is mid-reconfiguration. It counts as missing so the caller
/// retries until the display comes back.
pub fn desktop_extent(
    monitor_index: u32,
    attached: bool,
    width: i32,
    height: i32,
) -> Result<(u32, u32), GrabError> {
    if !attached {
        return Err(GrabError::DeviceEnumeration(format!(
            "monitor {monitor_index} is not attached to the desktop"
        )));
    }
    if width <= 0 || height <= 0 {
        return Err(GrabError::DeviceEnumeration(format!(
            "monitor {monitor_index} reports an empty {width}x{height} desktop"
        )));
    }
    Ok((width as u32, height as u32))
}

/// Decode a NUL-terminated UTF-16 buffer as returned by DXGI descriptors.
pub fn wide_to_string(wide: &[u16]) -> String {
    let end = wide.iter().position(|&c| c == 0).unwrap_or(wide.len());
    String::from_utf16_lossy(&wide[..end]).trim().to_string()
}

// ── Windows implementation ───────────────────────────────────────

#[cfg(target_os = "windows")]
mod platform {
    use super::*;
    use crate::capture::dxgi::classify as dxgi_error;
    use windows::Win32::Graphics::Dxgi::*;
    use windows::core::Interface;

    /// List every adapter and its outputs.
    pub fn enumerate_monitors() -> Result<Vec<AdapterInfo>, GrabError> {
        let factory: IDXGIFactory1 = unsafe { CreateDXGIFactory1() }
            .map_err(|e| dxgi_error("CreateDXGIFactory1", e))?;

        let mut adapters = Vec::new();
        for index in 0u32.. {
            let adapter = match unsafe { factory.EnumAdapters1(index) } {
                Ok(a) => a,
                Err(e) if e.code() == DXGI_ERROR_NOT_FOUND => break,
                Err(e) => return Err(dxgi_error("EnumAdapters1", e)),
            };
            let desc = unsafe { adapter.GetDesc1() }.map_err(|e| dxgi_error("GetDesc1", e))?;

            let mut outputs = Vec::new();
            for out_index in 0u32.. {
                let output = match unsafe { adapter.EnumOutputs(out_index) } {
                    Ok(o) => o,
                    Err(e) if e.code() == DXGI_ERROR_NOT_FOUND => break,
                    Err(e) => return Err(dxgi_error("EnumOutputs", e)),
                };
                let od = unsafe { output.GetDesc() }.map_err(|e| dxgi_error("GetDesc", e))?;
                let r = od.DesktopCoordinates;
                outputs.push(OutputInfo {
                    index: out_index,
                    device_name: wide_to_string(&od.DeviceName),
                    width: (r.right - r.left).max(0) as u32,
                    height: (r.bottom - r.top).max(0) as u32,
                    attached: od.AttachedToDesktop.as_bool(),
                });
            }

            adapters.push(AdapterInfo {
                index,
                description: wide_to_string(&desc.Description),
                outputs,
            });
        }
        Ok(adapters)
    }

    /// Resolve `(adapter_index, monitor_index)` to live DXGI objects.
    ///
    /// # Safety
    ///
    /// Plain COM calls; the caller owns the returned interfaces.
    pub(crate) unsafe fn open_output(
        adapter_index: u32,
        monitor_index: u32,
    ) -> Result<(IDXGIAdapter1, IDXGIOutput1), GrabError> {
        let factory: IDXGIFactory1 = unsafe { CreateDXGIFactory1() }
            .map_err(|e| dxgi_error("CreateDXGIFactory1", e))?;
        let adapter = unsafe { factory.EnumAdapters1(adapter_index) }.map_err(|e| {
            if e.code() == DXGI_ERROR_NOT_FOUND {
                GrabError::DeviceEnumeration(format!("adapter {adapter_index} not found"))
            } else {
                dxgi_error("EnumAdapters1", e)
            }
        })?;
        let output = unsafe { adapter.EnumOutputs(monitor_index) }.map_err(|e| {
            if e.code() == DXGI_ERROR_NOT_FOUND {
                GrabError::DeviceEnumeration(format!(
                    "monitor {monitor_index} not found on adapter {adapter_index}"
                ))
            } else {
                dxgi_error("EnumOutputs", e)
            }
        })?;
        let output1: IDXGIOutput1 = output
            .cast()
            .map_err(|e| dxgi_error("cast to IDXGIOutput1", e))?;
        Ok((adapter, output1))
    }
}

#[cfg(target_os = "windows")]
pub(crate) use platform::open_output;
#[cfg(target_os = "windows")]
pub use platform::enumerate_monitors;

// ── Non-Windows stub ─────────────────────────────────────────────

/// DXGI enumeration is only available on Windows.
#[cfg(not(target_os = "windows"))]
pub fn enumerate_monitors() -> Result<Vec<AdapterInfo>, GrabError> {
    Err(GrabError::DeviceEnumeration(
        "monitor enumeration is only available on Windows".into(),
    ))
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_strings_stop_at_nul() {
        let mut buf = [0u16; 32];
        for (i, c) in r"\\.\DISPLAY1".encode_utf16().enumerate() {
            buf[i] = c;
        }
        assert_eq!(wide_to_string(&buf), r"\\.\DISPLAY1");
        assert_eq!(wide_to_string(&[]), "");
    }

    #[test]
    fn display_lists_outputs() {
        let adapter = AdapterInfo {
            index: 0,
            description: "Test GPU".into(),
            outputs: vec![
                OutputInfo {
                    index: 0,
                    device_name: r"\\.\DISPLAY1".into(),
                    width: 2560,
                    height: 1440,
                    attached: true,
                },
                OutputInfo {
                    index: 1,
                    device_name: r"\\.\DISPLAY2".into(),
                    width: 1920,
                    height: 1080,
                    attached: false,
                },
            ],
        };
        let text = adapter.to_string();
        assert!(text.contains("adapter 0: Test GPU"));
        assert!(text.contains("monitor 0: \\\\.\\DISPLAY1 2560x1440"));
        assert!(text.contains("1920x1080 (detached)"));
    }

    #[test]
    fn detached_or_empty_outputs_are_missing_not_misconfigured() {
        let cases = [
            (false, 1920, 1080),
            (true, 0, 0),
            (true, 1920, 0),
            (true, -5, 1080),
        ];
        for (attached, w, h) in cases {
            let err = desktop_extent(1, attached, w, h).unwrap_err();
            assert!(matches!(err, GrabError::DeviceEnumeration(_)), "{attached} {w}x{h}");
            assert!(!err.is_fatal());
        }
        assert_eq!(desktop_extent(0, true, 2560, 1440).unwrap(), (2560, 1440));
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn enumeration_unavailable_off_windows() {
        assert!(matches!(
            enumerate_monitors(),
            Err(GrabError::DeviceEnumeration(_))
        ));
    }
}
