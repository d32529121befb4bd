//! DXGI Desktop Duplication grabber for Windows.
//!
//! Duplicates one monitor through Direct3D 11, copies each acquired
//! desktop texture into a CPU-readable staging texture and crops the
//! requested rectangle out of the mapped rows.
//!
//! On other platforms [`DxgiGrabber::new`] fails with
//! [`TileError::Capture`], so live mode is simply unavailable there.

use crate::error::TileError;
use crate::pixel::capture::{CaptureRect, FrameGrabber, RawScreenFrame};

/// Frame acquire timeout handed to `AcquireNextFrame`.
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u32 = 500;

/// DXGI-based desktop grabber.
///
/// # Safety
///
/// All unsafe FFI calls are confined to this struct.
pub struct DxgiGrabber {
    width: u32,
    height: u32,
    acquire_timeout_ms: u32,

    #[cfg(target_os = "windows")]
    context: windows::Win32::Graphics::Direct3D11::ID3D11DeviceContext,
    #[cfg(target_os = "windows")]
    duplication: windows::Win32::Graphics::Dxgi::IDXGIOutputDuplication,
    #[cfg(target_os = "windows")]
    staging: windows::Win32::Graphics::Direct3D11::ID3D11Texture2D,
}

// SAFETY: the D3D11 device is free-threaded and the immediate context is
// only ever touched through `&mut self`, so moving the grabber to the
// blocking pool cannot race.
#[cfg(target_os = "windows")]
unsafe impl Send for DxgiGrabber {}

impl DxgiGrabber {
    /// Desktop width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Desktop height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn with_acquire_timeout(mut self, timeout_ms: u32) -> Self {
        self.acquire_timeout_ms = timeout_ms;
        self
    }

    /// Clamp `rect` to the desktop, failing if nothing is left.
    fn clip(&self, rect: CaptureRect) -> Result<CaptureRect, TileError> {
        let x1 = rect.x.saturating_add(rect.width).min(self.width);
        let y1 = rect.y.saturating_add(rect.height).min(self.height);
        if rect.x >= x1 || rect.y >= y1 {
            return Err(TileError::Capture(format!(
                "capture rect {rect:?} lies outside the {}x{} desktop",
                self.width, self.height
            )));
        }
        Ok(CaptureRect {
            x: rect.x,
            y: rect.y,
            width: x1 - rect.x,
            height: y1 - rect.y,
        })
    }
}

// ── Windows implementation ───────────────────────────────────────

#[cfg(target_os = "windows")]
mod platform {
    use super::*;
    use crate::pixel::capture::PixelFormat;
    use windows::{
        core::Interface,
        Win32::Graphics::{
            Direct3D::D3D_DRIVER_TYPE_HARDWARE,
            Direct3D11::*,
            Dxgi::{Common::*, *},
        },
    };

    fn fail(what: &str, e: windows::core::Error) -> TileError {
        TileError::Capture(format!("{what} failed: {e}"))
    }

    impl DxgiGrabber {
        /// Duplicate monitor `monitor_index` (0 = primary).
        pub fn new(monitor_index: u32) -> Result<Self, TileError> {
            unsafe { Self::init(monitor_index) }
        }

        unsafe fn init(monitor_index: u32) -> Result<Self, TileError> {
            let mut device = None;
            let mut context = None;
            unsafe {
                D3D11CreateDevice(
                    None,
                    D3D_DRIVER_TYPE_HARDWARE,
                    None,
                    D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                    None,
                    D3D11_SDK_VERSION,
                    Some(&mut device),
                    None,
                    Some(&mut context),
                )
                .map_err(|e| fail("D3D11CreateDevice", e))?;
            }
            let device: ID3D11Device =
                device.ok_or_else(|| TileError::Capture("D3D11 device is None".into()))?;
            let context =
                context.ok_or_else(|| TileError::Capture("D3D11 context is None".into()))?;

            let dxgi_device: IDXGIDevice =
                device.cast().map_err(|e| fail("cast to IDXGIDevice", e))?;
            let adapter = unsafe { dxgi_device.GetAdapter() }.map_err(|e| fail("GetAdapter", e))?;
            let output: IDXGIOutput = unsafe { adapter.EnumOutputs(monitor_index) }
                .map_err(|e| fail("EnumOutputs", e))?;
            let output1: IDXGIOutput1 =
                output.cast().map_err(|e| fail("cast to IDXGIOutput1", e))?;
            let duplication =
                unsafe { output1.DuplicateOutput(&device) }.map_err(|e| fail("DuplicateOutput", e))?;

            let desc = unsafe { duplication.GetDesc() };
            let width = desc.ModeDesc.Width;
            let height = desc.ModeDesc.Height;

            let staging_desc = D3D11_TEXTURE2D_DESC {
                Width: width,
                Height: height,
                MipLevels: 1,
                ArraySize: 1,
                Format: DXGI_FORMAT_B8G8R8A8_UNORM,
                SampleDesc: DXGI_SAMPLE_DESC {
                    Count: 1,
                    Quality: 0,
                },
                Usage: D3D11_USAGE_STAGING,
                BindFlags: 0,
                CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
                MiscFlags: 0,
            };
            let mut staging = None;
            unsafe { device.CreateTexture2D(&staging_desc, None, Some(&mut staging)) }
                .map_err(|e| fail("CreateTexture2D", e))?;
            let staging =
                staging.ok_or_else(|| TileError::Capture("staging texture is None".into()))?;

            Ok(Self {
                width,
                height,
                acquire_timeout_ms: DEFAULT_ACQUIRE_TIMEOUT_MS,
                context,
                duplication,
                staging,
            })
        }

        unsafe fn grab_inner(&mut self, rect: CaptureRect) -> Result<RawScreenFrame, TileError> {
            let mut info = DXGI_OUTDUPL_FRAME_INFO::default();
            let mut resource = None;
            match unsafe {
                self.duplication
                    .AcquireNextFrame(self.acquire_timeout_ms, &mut info, &mut resource)
            } {
                Ok(()) => {}
                Err(e) if e.code() == DXGI_ERROR_WAIT_TIMEOUT => {
                    return Err(TileError::Timeout(std::time::Duration::from_millis(
                        self.acquire_timeout_ms as u64,
                    )));
                }
                Err(e) => return Err(fail("AcquireNextFrame", e)),
            }

            let resource =
                resource.ok_or_else(|| TileError::Capture("acquired resource is None".into()))?;
            let texture: ID3D11Texture2D = match resource.cast() {
                Ok(t) => t,
                Err(e) => {
                    let _ = unsafe { self.duplication.ReleaseFrame() };
                    return Err(fail("cast to ID3D11Texture2D", e));
                }
            };
            unsafe { self.context.CopyResource(&self.staging, &texture) };
            let _ = unsafe { self.duplication.ReleaseFrame() };

            let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
            unsafe {
                self.context
                    .Map(&self.staging, 0, D3D11_MAP_READ, 0, Some(&mut mapped))
            }
            .map_err(|e| fail("Map", e))?;

            let pitch = mapped.RowPitch as usize;
            let src = unsafe {
                std::slice::from_raw_parts(mapped.pData as *const u8, pitch * self.height as usize)
            };
            let bpp = PixelFormat::Bgra8.bytes_per_pixel();
            let row_len = rect.width as usize * bpp;
            let mut data = Vec::with_capacity(row_len * rect.height as usize);
            for y in rect.y..rect.y + rect.height {
                let start = y as usize * pitch + rect.x as usize * bpp;
                data.extend_from_slice(&src[start..start + row_len]);
            }
            unsafe { self.context.Unmap(&self.staging, 0) };

            Ok(RawScreenFrame {
                width: rect.width,
                height: rect.height,
                stride: row_len as u32,
                format: PixelFormat::Bgra8,
                data,
            })
        }
    }

    impl FrameGrabber for DxgiGrabber {
        fn grab(&mut self, rect: CaptureRect) -> Result<RawScreenFrame, TileError> {
            let rect = self.clip(rect)?;
            unsafe { self.grab_inner(rect) }
        }
    }
}

// ── Non-Windows stub ─────────────────────────────────────────────

#[cfg(not(target_os = "windows"))]
impl DxgiGrabber {
    /// DXGI is only available on Windows.
    pub fn new(_monitor_index: u32) -> Result<Self, TileError> {
        Err(TileError::Capture(
            "DXGI Desktop Duplication is only available on Windows".into(),
        ))
    }
}

#[cfg(not(target_os = "windows"))]
impl FrameGrabber for DxgiGrabber {
    fn grab(&mut self, rect: CaptureRect) -> Result<RawScreenFrame, TileError> {
        let rect = self.clip(rect)?;
        Err(TileError::Capture(format!(
            "cannot grab {rect:?}: not supported on this platform"
        )))
    }
}
