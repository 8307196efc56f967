// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with (requested, not required) validation layers
// - Surface creation through the window collaborator
// - Physical device selection: Vulkan 1.3 + dynamic rendering + present support
// - Logical device + graphics/present queues (possibly the same queue)

use ash::extensions::{ext::DebugUtils, khr};
use ash::{vk, Entry};
use std::ffi::{c_char, c_void, CStr, CString};

use crate::error::{Error, Result};
use crate::logging::LogSink;
use crate::{sink_debug, sink_error, sink_info, sink_warn};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Anything that can hand the device context a presentable surface.
///
/// Implemented by the winit window and by the headless surface used in tests.
pub trait SurfaceSource {
    /// Instance extensions the surface needs (VK_KHR_surface + platform one)
    fn required_extensions(&self) -> Result<Vec<*const c_char>>;

    /// Create the surface. Ownership passes to the caller.
    fn produce_surface(&self, entry: &Entry, instance: &ash::Instance) -> Result<vk::SurfaceKHR>;

    /// Current drawable size in pixels
    fn extent(&self) -> vk::Extent2D;
}

/// Queue family indices picked for a physical device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// Distinct family indices, for queue create infos
    pub fn unique(&self) -> Vec<u32> {
        if self.graphics == self.present {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Device context: instance, surface, selected GPU, logical device, queues.
///
/// Destroyed explicitly through [`DeviceContext::destroy`], after everything
/// created from the device is gone.
pub struct DeviceContext {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    pub entry: Entry,

    pub surface: vk::SurfaceKHR,
    pub surface_loader: khr::Surface,

    pub queue_families: QueueFamilies,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,

    pub properties: vk::PhysicalDeviceProperties,

    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    // Boxed so the messenger's user-data pointer stays put
    _debug_log: Box<LogSink>,
    log: LogSink,
    destroyed: bool,
}

impl DeviceContext {
    /// Create instance, surface, and logical device.
    ///
    /// # Arguments
    /// * `source` - Window (or headless) collaborator producing the surface
    /// * `app_name` - Application name for debugging
    /// * `enable_validation` - Request Khronos validation layers
    pub fn initialize(
        source: &dyn SurfaceSource,
        app_name: &str,
        enable_validation: bool,
        log: &LogSink,
    ) -> Result<Self> {
        sink_info!(log, "Creating Vulkan device: {}", app_name);

        let entry = unsafe { Entry::load() }
            .map_err(|e| Error::DeviceInit(format!("Failed to load Vulkan library: {e}")))?;

        let enable_validation = enable_validation && Self::validation_available(&entry, log);
        let instance = Self::create_instance(&entry, source, app_name, enable_validation)?;
        sink_debug!(log, "Created Vulkan Instance: {:?}", instance.handle());

        let debug_log = Box::new(log.with_target("vulkan"));
        let debug_utils = if enable_validation {
            match Self::setup_debug_messenger(&entry, &instance, &debug_log) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        let surface_loader = khr::Surface::new(&entry, &instance);
        let surface = match source.produce_surface(&entry, &instance) {
            Ok(surface) => surface,
            Err(e) => {
                unsafe { Self::destroy_instance_level(&instance, None, debug_utils.as_ref()) };
                return Err(e);
            }
        };
        sink_debug!(log, "Created Surface: {:?}", surface);

        let selected = Self::pick_physical_device(&instance, &surface_loader, surface, log)
            .and_then(|(physical_device, families)| {
                Self::create_logical_device(&instance, physical_device, families)
                    .map(|device| (physical_device, families, device))
            });

        let (physical_device, queue_families, device) = match selected {
            Ok(selected) => selected,
            Err(e) => {
                unsafe {
                    Self::destroy_instance_level(
                        &instance,
                        Some((&surface_loader, surface)),
                        debug_utils.as_ref(),
                    )
                };
                return Err(e);
            }
        };

        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };

        sink_debug!(log, "Selected Physical Device: {:?}", physical_device);
        sink_debug!(log, "Created Logical Device: {:?}", device.handle());
        sink_debug!(log, "Graphics Queue: {:?}", graphics_queue);
        sink_debug!(log, "Present Queue: {:?}", present_queue);
        let gpu_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
        sink_info!(log, "Selected GPU: {}", gpu_name.to_string_lossy());
        sink_info!(
            log,
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        Ok(Self {
            device,
            physical_device,
            instance,
            entry,
            surface,
            surface_loader,
            queue_families,
            graphics_queue,
            present_queue,
            properties,
            debug_utils,
            _debug_log: debug_log,
            log: log.clone(),
            destroyed: false,
        })
    }

    fn validation_available(entry: &Entry, log: &LogSink) -> bool {
        let layers = match entry.enumerate_instance_layer_properties() {
            Ok(layers) => layers,
            Err(e) => {
                sink_warn!(log, "Could not enumerate instance layers: {}", e);
                return false;
            }
        };

        let found = layers.iter().any(|layer| {
            let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
            name == VALIDATION_LAYER
        });

        if !found {
            sink_warn!(
                log,
                "{} not installed, continuing without validation",
                VALIDATION_LAYER.to_string_lossy()
            );
        }
        found
    }

    fn create_instance(
        entry: &Entry,
        source: &dyn SurfaceSource,
        app_name: &str,
        enable_validation: bool,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name)
            .map_err(|e| Error::DeviceInit(format!("Invalid application name: {e}")))?;
        let engine_name = c"vk-frame-loop";

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        let mut extensions = source.required_extensions()?;
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

        let result = unsafe { entry.create_instance(&create_info, None) };
        result.map_err(Error::device_init("Failed to create Vulkan instance"))
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
        debug_log: &LogSink,
    ) -> Result<(DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback))
            .user_data(debug_log as *const LogSink as *mut c_void);

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .map_err(Error::device_init("Failed to create debug messenger"))?;

        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(
        instance: &ash::Instance,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
        log: &LogSink,
    ) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .map_err(Error::device_init("Failed to enumerate physical devices"))?;

        if devices.is_empty() {
            return Err(Error::DeviceInit("No Vulkan-capable GPU found".into()));
        }

        let mut best_device = None;
        let mut best_score = 0;

        for device in devices {
            let props = unsafe { instance.get_physical_device_properties(device) };
            let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }.to_string_lossy();

            let dynamic_rendering = Self::supports_dynamic_rendering(instance, device);
            let has_swapchain = Self::supports_swapchain(instance, device);
            if !meets_requirements(props.api_version, dynamic_rendering, has_swapchain) {
                sink_debug!(log, "Skipping {}: missing Vulkan 1.3 requirements", name);
                continue;
            }

            let queue_families =
                unsafe { instance.get_physical_device_queue_family_properties(device) };
            let families = choose_queue_families(&queue_families, |index| unsafe {
                surface_loader
                    .get_physical_device_surface_support(device, index, surface)
                    .unwrap_or(false)
            });

            let Some(families) = families else {
                sink_debug!(log, "Skipping {}: no graphics/present queue", name);
                continue;
            };

            let score = device_type_score(props.device_type);
            if score > best_score {
                best_score = score;
                best_device = Some((device, families));
            }
        }

        best_device.ok_or_else(|| Error::DeviceInit("No suitable GPU found".into()))
    }

    fn supports_dynamic_rendering(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
        let mut features13 = vk::PhysicalDeviceVulkan13Features::default();
        {
            let mut features2 = vk::PhysicalDeviceFeatures2::builder().push_next(&mut features13);
            unsafe { instance.get_physical_device_features2(device, &mut features2) };
        }
        features13.dynamic_rendering == vk::TRUE
    }

    fn supports_swapchain(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
        let Ok(extensions) = (unsafe { instance.enumerate_device_extension_properties(device) })
        else {
            return false;
        };
        has_extension(&extensions, khr::Swapchain::name())
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        families: QueueFamilies,
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions = [khr::Swapchain::name().as_ptr()];

        // Draw without a render pass/framebuffer object
        let mut features13 = vk::PhysicalDeviceVulkan13Features::builder().dynamic_rendering(true);

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .push_next(&mut features13);

        let result = unsafe { instance.create_device(physical_device, &create_info, None) };
        result.map_err(Error::device_init("Failed to create logical device"))
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        let result = unsafe { self.device.device_wait_idle() };
        result.map_err(Error::render("device wait idle"))
    }

    pub fn log(&self) -> &LogSink {
        &self.log
    }

    /// Destroy surface, device, debug messenger and instance, in that order.
    ///
    /// Everything created from the device (swapchain, pool, sync objects)
    /// must already be gone. Calling twice is a no-op.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
            sink_debug!(self.log, "Destroyed Surface");

            self.device.destroy_device(None);
            sink_debug!(self.log, "Destroyed Logical Device");

            Self::destroy_instance_level(&self.instance, None, self.debug_utils.as_ref());
            sink_debug!(self.log, "Destroyed Vulkan Instance");
        }
        self.debug_utils = None;
    }

    unsafe fn destroy_instance_level(
        instance: &ash::Instance,
        surface: Option<(&khr::Surface, vk::SurfaceKHR)>,
        debug_utils: Option<&(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    ) {
        if let Some((loader, surface)) = surface {
            loader.destroy_surface(surface, None);
        }
        if let Some((debug_utils, messenger)) = debug_utils {
            debug_utils.destroy_debug_utils_messenger(*messenger, None);
        }
        instance.destroy_instance(None);
    }
}

/// Vulkan 1.3 core, dynamic rendering, and a swapchain extension.
/// Whether `name` is among the enumerated device extensions
pub fn has_extension(extensions: &[vk::ExtensionProperties], name: &CStr) -> bool {
    extensions.iter().any(|ext| {
        let ext_name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
        ext_name == name
    })
}

pub fn meets_requirements(api_version: u32, dynamic_rendering: bool, has_swapchain: bool) -> bool {
    api_version >= vk::API_VERSION_1_3 && dynamic_rendering && has_swapchain
}

/// Prefer discrete GPU, then integrated, then anything else.
pub fn device_type_score(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        _ => 1,
    }
}

/// Pick graphics and present families.
///
/// A family that can do both wins, so graphics and present may share a queue.
pub fn choose_queue_families(
    families: &[vk::QueueFamilyProperties],
    supports_present: impl Fn(u32) -> bool,
) -> Option<QueueFamilies> {
    let is_graphics =
        |props: &vk::QueueFamilyProperties| props.queue_flags.contains(vk::QueueFlags::GRAPHICS);

    let mut graphics = None;
    let mut present = None;

    for (index, props) in families.iter().enumerate() {
        let index = index as u32;
        let can_present = supports_present(index);

        if is_graphics(props) && can_present {
            return Some(QueueFamilies {
                graphics: index,
                present: index,
            });
        }
        if graphics.is_none() && is_graphics(props) {
            graphics = Some(index);
        }
        if present.is_none() && can_present {
            present = Some(index);
        }
    }

    Some(QueueFamilies {
        graphics: graphics?,
        present: present?,
    })
}

// Validation layer callback. User data is the context's boxed `LogSink`.
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    p_user_data: *mut c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || p_user_data.is_null() {
        return vk::FALSE;
    }

    let log = &*(p_user_data as *const LogSink);
    let message = CStr::from_ptr((*p_callback_data).p_message).to_string_lossy();

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => sink_error!(log, "{}", message),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => sink_warn!(log, "{}", message),
        _ => sink_debug!(log, "{}", message),
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn extension(name: &str) -> vk::ExtensionProperties {
        let mut props = vk::ExtensionProperties::default();
        for (dst, &byte) in props.extension_name.iter_mut().zip(name.as_bytes()) {
            *dst = byte as c_char;
        }
        props
    }

    #[test]
    fn swapchain_extension_matched_by_exact_name() {
        let extensions = [extension("VK_KHR_maintenance1"), extension("VK_KHR_swapchain")];
        assert!(has_extension(&extensions, khr::Swapchain::name()));

        let lookalike = [extension("VK_KHR_swapchain_mutable_format")];
        assert!(!has_extension(&lookalike, khr::Swapchain::name()));
        assert!(!has_extension(&[], khr::Swapchain::name()));
    }

    #[test]
    fn shared_graphics_present_family_preferred() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        // family 1 graphics-only (no present), family 2 both
        let chosen = choose_queue_families(&families, |i| i != 1).unwrap();
        assert_eq!(chosen, QueueFamilies { graphics: 2, present: 2 });
        assert_eq!(chosen.unique(), vec![2]);
    }

    #[test]
    fn split_families_when_no_single_family_does_both() {
        let families = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::TRANSFER)];
        let chosen = choose_queue_families(&families, |i| i == 1).unwrap();
        assert_eq!(chosen, QueueFamilies { graphics: 0, present: 1 });
        assert_eq!(chosen.unique(), vec![0, 1]);
    }

    #[test]
    fn no_present_support_rejects_device() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        assert!(choose_queue_families(&families, |_| false).is_none());
    }

    #[test]
    fn no_graphics_rejects_device() {
        let families = [family(vk::QueueFlags::COMPUTE)];
        assert!(choose_queue_families(&families, |_| true).is_none());
    }

    #[test]
    fn requirements_need_1_3_and_dynamic_rendering() {
        assert!(meets_requirements(vk::API_VERSION_1_3, true, true));
        assert!(meets_requirements(vk::make_api_version(0, 1, 4, 0), true, true));
        assert!(!meets_requirements(vk::API_VERSION_1_2, true, true));
        assert!(!meets_requirements(vk::API_VERSION_1_3, false, true));
        assert!(!meets_requirements(vk::API_VERSION_1_3, true, false));
    }

    #[test]
    fn discrete_beats_integrated_beats_cpu() {
        let discrete = device_type_score(vk::PhysicalDeviceType::DISCRETE_GPU);
        let integrated = device_type_score(vk::PhysicalDeviceType::INTEGRATED_GPU);
        let cpu = device_type_score(vk::PhysicalDeviceType::CPU);
        assert!(discrete > integrated);
        assert!(integrated > cpu);
        assert!(cpu > 0);
    }
}
