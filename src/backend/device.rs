// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with optional validation layers
// - Surface creation for the presentation window
// - Physical device selection (prefer discrete GPU)
// - Logical device + graphics/present queue creation
// - Memory type resolution for every allocation in the renderer

use ash::extensions::{ext::DebugUtils, khr};
use ash::{vk, Entry};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle, RawDisplayHandle, RawWindowHandle};
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::sync::Arc;

use crate::error::{RenderError, RenderResult, VkResultExt};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Graphics and present queue family indices.
///
/// The two families are searched independently. When they differ the
/// swapchain images are shared concurrently between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    /// Find a graphics family and a family able to present.
    ///
    /// The graphics family is reused for presentation whenever it can present,
    /// which keeps the common case on exclusive image sharing.
    pub fn find(
        families: &[vk::QueueFamilyProperties],
        supports_present: impl Fn(u32) -> bool,
    ) -> Option<Self> {
        let usable = |props: &vk::QueueFamilyProperties| props.queue_count > 0;

        let graphics = families
            .iter()
            .enumerate()
            .find(|(_, props)| usable(props) && props.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            .map(|(i, _)| i as u32)?;

        let present = if supports_present(graphics) {
            graphics
        } else {
            families
                .iter()
                .enumerate()
                .filter(|(_, props)| usable(props))
                .map(|(i, _)| i as u32)
                .find(|&i| supports_present(i))?
        };

        Some(Self { graphics, present })
    }

    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Unique family indices, graphics first
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Return the first memory type in `type_bits` carrying all `required` flags
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> RenderResult<u32> {
    (0..memory_properties.memory_type_count)
        .find(|&i| {
            let in_mask = type_bits & (1 << i) != 0;
            in_mask
                && memory_properties.memory_types[i as usize]
                    .property_flags
                    .contains(required)
        })
        .ok_or(RenderError::NoCompatibleMemoryType { type_bits, required })
}

/// Presentation surface plus the loader used to query it
pub struct SurfaceContext {
    pub loader: khr::Surface,
    pub handle: vk::SurfaceKHR,
}

/// Shared device context with automatic cleanup.
///
/// Every GPU object in the crate holds an `Arc<DeviceContext>`, so the device
/// outlives all of them.
pub struct DeviceContext {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    _entry: Entry,

    pub queue_families: QueueFamilyIndices,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,

    surface: Option<SurfaceContext>,
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,

    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl DeviceContext {
    /// Create a device able to present to `window`
    ///
    /// # Arguments
    /// * `app_name` - Application name for debugging
    /// * `enable_validation` - Enable Vulkan validation layers when available
    pub fn new<W>(app_name: &str, enable_validation: bool, window: &W) -> RenderResult<Arc<Self>>
    where
        W: HasRawDisplayHandle + HasRawWindowHandle,
    {
        Self::create(
            app_name,
            enable_validation,
            Some((window.raw_display_handle(), window.raw_window_handle())),
        )
    }

    /// Create a device without a surface (transfers only)
    pub fn headless(app_name: &str) -> RenderResult<Arc<Self>> {
        Self::create(app_name, false, None)
    }

    fn create(
        app_name: &str,
        enable_validation: bool,
        window: Option<(RawDisplayHandle, RawWindowHandle)>,
    ) -> RenderResult<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", app_name);

        let entry = unsafe { Entry::load() }?;

        let enable_validation = enable_validation && Self::validation_available(&entry);
        let instance = Self::create_instance(&entry, app_name, enable_validation, window.map(|w| w.0))?;

        let debug_utils = if enable_validation {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        let surface = match window {
            Some((display, handle)) => {
                let handle = unsafe { ash_window::create_surface(&entry, &instance, display, handle, None) }
                    .context("Failed to create window surface")?;
                Some(SurfaceContext {
                    loader: khr::Surface::new(&entry, &instance),
                    handle,
                })
            }
            None => None,
        };

        let (physical_device, queue_families) = Self::pick_physical_device(&instance, surface.as_ref())?;

        let (device, graphics_queue, present_queue) = Self::create_logical_device(
            &instance,
            physical_device,
            queue_families,
            surface.is_some(),
        )?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(physical_device) };

        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "Queue families: graphics={} present={}",
            queue_families.graphics,
            queue_families.present
        );

        Ok(Arc::new(Self {
            device,
            physical_device,
            instance,
            _entry: entry,
            queue_families,
            graphics_queue,
            present_queue,
            surface,
            debug_utils,
            memory_properties,
        }))
    }

    fn validation_available(entry: &Entry) -> bool {
        let layers = entry.enumerate_instance_layer_properties().unwrap_or_default();
        let found = layers
            .iter()
            .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER);
        if !found {
            log::warn!("Validation layers requested but not available; continuing without them");
        }
        found
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        enable_validation: bool,
        display: Option<RawDisplayHandle>,
    ) -> RenderResult<ash::Instance> {
        let app_name_cstr = CString::new(app_name).unwrap_or_default();
        let engine_name = c"frame-renderer";

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_1);

        let mut extensions: Vec<*const c_char> = match display {
            Some(display) => ash_window::enumerate_required_extensions(display)
                .context("Failed to query surface extensions")?
                .to_vec(),
            None => Vec::new(),
        };
        if enable_validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let layer_names = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        unsafe { entry.create_instance(&create_info, None) }.context("Failed to create Vulkan instance")
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> RenderResult<(DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to create debug messenger")?;

        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(
        instance: &ash::Instance,
        surface: Option<&SurfaceContext>,
    ) -> RenderResult<(vk::PhysicalDevice, QueueFamilyIndices)> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;

        let mut best_device = None;
        let mut best_score = 0;

        for device in devices {
            let props = unsafe { instance.get_physical_device_properties(device) };
            let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };

            let indices = QueueFamilyIndices::find(&queue_families, |family| match surface {
                Some(surface) => unsafe {
                    surface
                        .loader
                        .get_physical_device_surface_support(device, family, surface.handle)
                        .unwrap_or(false)
                },
                // Headless: presentation is never used
                None => true,
            });
            let Some(indices) = indices else {
                continue;
            };

            if let Some(surface) = surface {
                if !Self::supports_swapchain(instance, device) || !Self::surface_adequate(surface, device) {
                    continue;
                }
            }

            let score = match props.device_type {
                vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
                vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
                _ => 1,
            };

            if score > best_score {
                best_score = score;
                best_device = Some((device, indices));
            }
        }

        best_device.ok_or(RenderError::NoSuitableGpu)
    }

    fn supports_swapchain(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
        let extensions = unsafe { instance.enumerate_device_extension_properties(device) }.unwrap_or_default();
        extensions
            .iter()
            .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == khr::Swapchain::name())
    }

    fn surface_adequate(surface: &SurfaceContext, device: vk::PhysicalDevice) -> bool {
        let formats = unsafe {
            surface
                .loader
                .get_physical_device_surface_formats(device, surface.handle)
        }
        .unwrap_or_default();
        let modes = unsafe {
            surface
                .loader
                .get_physical_device_surface_present_modes(device, surface.handle)
        }
        .unwrap_or_default();
        !formats.is_empty() && !modes.is_empty()
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_families: QueueFamilyIndices,
        presentable: bool,
    ) -> RenderResult<(ash::Device, vk::Queue, vk::Queue)> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = queue_families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions = if presentable {
            vec![khr::Swapchain::name().as_ptr()]
        } else {
            vec![]
        };
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")?;

        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };

        Ok((device, graphics_queue, present_queue))
    }

    /// Resolve a memory type index for an allocation
    pub fn resolve_memory_type(
        &self,
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    ) -> RenderResult<u32> {
        find_memory_type(&self.memory_properties, type_bits, required)
    }

    /// The presentation surface, if this device was created for a window
    pub fn surface(&self) -> RenderResult<&SurfaceContext> {
        self.surface
            .as_ref()
            .ok_or_else(|| RenderError::Window("device was created without a surface".into()))
    }

    /// Wait for device to be idle (shutdown and swapchain teardown only)
    pub fn wait_idle(&self) -> RenderResult<()> {
        unsafe { self.device.device_wait_idle() }.context("Failed to wait for device idle")
    }

    /// Wait for the graphics queue to drain (synchronous uploads)
    pub fn graphics_queue_wait_idle(&self) -> RenderResult<()> {
        unsafe { self.device.queue_wait_idle(self.graphics_queue) }.context("Failed to wait for queue idle")
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        // Cleanup in reverse order
        unsafe {
            self.device.destroy_device(None);

            if let Some(surface) = self.surface.take() {
                surface.loader.destroy_surface(surface.handle, None);
            }

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::trace!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
