//! Explicit-barrier backend on Vulkan 1.2.
//!
//! Every queue carries a timeline semaphore that the backend signals with a
//! monotonically increasing value on each submission; command buffer
//! completion is read from it instead of from per-buffer fences.

use std::ffi::{c_char, c_void, CStr, CString};
use std::sync::Arc;

use ash::extensions::{ext, khr};
use ash::vk;
use parking_lot::Mutex;
use raw_window_handle::RawDisplayHandle;

use super::{ContextInfo, GPUError, QueueType, Result};

mod command_pool;
pub(crate) use command_pool::{VulkanCommandPool, VulkanSink};
mod conversions;
pub(crate) use conversions::*;
mod display;
pub(crate) use display::VulkanSwapchain;
mod sync;
pub(crate) use sync::{VulkanEvent, VulkanFence, VulkanSemaphore};

pub use command_pool::VulkanAccelerationStructureBuild;

/// Names of debugging layers enabled when validation is requested.
pub const DEBUG_LAYER_NAMES: [*const c_char; 1] =
    [b"VK_LAYER_KHRONOS_validation\0".as_ptr() as *const c_char];

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message).to_string_lossy();
    let level = if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::Level::Error
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::Level::Warn
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::Level::Debug
    } else {
        log::Level::Trace
    };
    log::log!(target: "nori::vulkan", level, "[{:?}] {}", message_type, message);
    vk::FALSE
}

pub(crate) struct VulkanQueueState {
    pub(crate) raw: vk::Queue,
    pub(crate) last_submitted: u64,
}

/// A native queue plus the timeline it retires work on.
///
/// Queue types that fall back onto the same family share one of these.
pub(crate) struct VulkanQueue {
    pub(crate) family: u32,
    pub(crate) timeline: vk::Semaphore,
    pub(crate) state: Mutex<VulkanQueueState>,
}

impl VulkanQueue {
    pub(crate) fn completed_value(&self, device: &ash::Device) -> Result<u64> {
        Ok(unsafe { device.get_semaphore_counter_value(self.timeline) }?)
    }
}

pub(crate) struct VulkanDevice {
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) pdevice: vk::PhysicalDevice,
    pub(crate) device: ash::Device,
    pub(crate) properties: vk::PhysicalDeviceProperties,
    queues: [Arc<VulkanQueue>; 3],
    debug_utils: Option<ext::DebugUtils>,
    messenger: vk::DebugUtilsMessengerEXT,
    pub(crate) surface_loader: Option<khr::Surface>,
    pub(crate) swapchain_loader: Option<khr::Swapchain>,
    pub(crate) acceleration_structure: Option<khr::AccelerationStructure>,
}

fn has_extension(available: &[vk::ExtensionProperties], name: &CStr) -> bool {
    available
        .iter()
        .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == name)
}

/// Pick the first family with `wanted` and without `avoid`, else the first
/// with `wanted`.
fn pick_family(
    props: &[vk::QueueFamilyProperties],
    wanted: vk::QueueFlags,
    avoid: vk::QueueFlags,
) -> Option<u32> {
    let dedicated = props
        .iter()
        .position(|p| p.queue_flags.contains(wanted) && !p.queue_flags.intersects(avoid));
    dedicated
        .or_else(|| props.iter().position(|p| p.queue_flags.contains(wanted)))
        .map(|i| i as u32)
}

impl VulkanDevice {
    pub(crate) fn new(info: &ContextInfo, display: Option<RawDisplayHandle>) -> Result<Self> {
        let entry = unsafe { ash::Entry::load() }?;

        let app_name = CString::new("nori").map_err(|_| GPUError::InvalidUsage("app name"))?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .engine_name(&app_name)
            .api_version(vk::make_api_version(0, 1, 2, 0))
            .build();

        let available_inst_exts = entry.enumerate_instance_extension_properties(None)?;
        let mut inst_exts: Vec<*const c_char> = Vec::new();
        let validation = info.enable_validation
            && has_extension(&available_inst_exts, ext::DebugUtils::name());
        if info.enable_validation && !validation {
            log::warn!("VK_EXT_debug_utils unavailable; validation messages disabled");
        }
        if validation {
            inst_exts.push(ext::DebugUtils::name().as_ptr());
        }
        if let Some(display) = display {
            inst_exts.extend_from_slice(ash_window::enumerate_required_extensions(display)?);
        }

        let mut inst_layers = Vec::new();
        if info.enable_validation {
            let available_layers = entry.enumerate_instance_layer_properties()?;
            for &layer in &DEBUG_LAYER_NAMES {
                let name = unsafe { CStr::from_ptr(layer) };
                if available_layers
                    .iter()
                    .any(|prop| unsafe { CStr::from_ptr(prop.layer_name.as_ptr()) == name })
                {
                    inst_layers.push(layer);
                } else {
                    log::warn!("Validation layer {:?} not installed", name);
                }
            }
        }

        let instance = unsafe {
            entry.create_instance(
                &vk::InstanceCreateInfo::builder()
                    .application_info(&app_info)
                    .enabled_extension_names(&inst_exts)
                    .enabled_layer_names(&inst_layers)
                    .build(),
                None,
            )
        }?;

        let (debug_utils, messenger) = if validation {
            let utils = ext::DebugUtils::new(&entry, &instance);
            let ci = vk::DebugUtilsMessengerCreateInfoEXT::builder()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(vulkan_debug_callback))
                .build();
            match unsafe { utils.create_debug_utils_messenger(&ci, None) } {
                Ok(m) => (Some(utils), m),
                Err(e) => {
                    log::warn!("Failed to create debug messenger: {:?}", e);
                    (Some(utils), vk::DebugUtilsMessengerEXT::null())
                }
            }
        } else {
            (None, vk::DebugUtilsMessengerEXT::null())
        };

        match Self::init_device(info, entry, instance, debug_utils, messenger, display.is_some()) {
            Ok(dev) => Ok(dev),
            Err((e, instance, debug_utils, messenger)) => {
                unsafe {
                    if let Some(utils) = &debug_utils {
                        if messenger != vk::DebugUtilsMessengerEXT::null() {
                            utils.destroy_debug_utils_messenger(messenger, None);
                        }
                    }
                    instance.destroy_instance(None);
                }
                Err(e)
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn init_device(
        info: &ContextInfo,
        entry: ash::Entry,
        instance: ash::Instance,
        debug_utils: Option<ext::DebugUtils>,
        messenger: vk::DebugUtilsMessengerEXT,
        windowed: bool,
    ) -> std::result::Result<
        Self,
        (
            GPUError,
            ash::Instance,
            Option<ext::DebugUtils>,
            vk::DebugUtilsMessengerEXT,
        ),
    > {
        macro_rules! bail {
            ($e:expr) => {
                match $e {
                    Ok(v) => v,
                    Err(e) => return Err((e.into(), instance, debug_utils, messenger)),
                }
            };
        }

        let pdevices = bail!(unsafe { instance.enumerate_physical_devices() });
        let pdevice = bail!(pdevices
            .get(info.device_index)
            .copied()
            .ok_or(GPUError::NoSuitableDevice));
        let properties = unsafe { instance.get_physical_device_properties(pdevice) };
        if vk::api_version_major(properties.api_version) == 1
            && vk::api_version_minor(properties.api_version) < 2
        {
            log::error!("Device does not support Vulkan 1.2");
            return Err((GPUError::NoSuitableDevice, instance, debug_utils, messenger));
        }

        let mut supported12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut query = vk::PhysicalDeviceFeatures2::builder().push_next(&mut supported12);
        unsafe { instance.get_physical_device_features2(pdevice, &mut query) };
        if supported12.timeline_semaphore != vk::TRUE {
            log::error!("Device does not support timeline semaphores");
            return Err((GPUError::NoSuitableDevice, instance, debug_utils, messenger));
        }

        let queue_props =
            unsafe { instance.get_physical_device_queue_family_properties(pdevice) };
        let gfx_family = bail!(pick_family(
            &queue_props,
            vk::QueueFlags::GRAPHICS,
            vk::QueueFlags::empty()
        )
        .ok_or(GPUError::QueueUnavailable(QueueType::Graphics)));
        let compute_family =
            pick_family(&queue_props, vk::QueueFlags::COMPUTE, vk::QueueFlags::GRAPHICS)
                .unwrap_or(gfx_family);
        let transfer_family = pick_family(
            &queue_props,
            vk::QueueFlags::TRANSFER,
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
        )
        .unwrap_or(compute_family);
        let families = [gfx_family, compute_family, transfer_family];

        let mut unique_families = vec![gfx_family];
        for f in [compute_family, transfer_family] {
            if !unique_families.contains(&f) {
                unique_families.push(f);
            }
        }
        let priorities = [1.0];
        let queue_infos: Vec<_> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let available_exts =
            bail!(unsafe { instance.enumerate_device_extension_properties(pdevice) });
        let mut device_exts: Vec<*const c_char> = Vec::new();
        if windowed {
            if !has_extension(&available_exts, khr::Swapchain::name()) {
                log::error!("Device cannot present: VK_KHR_swapchain missing");
                return Err((GPUError::NoSuitableDevice, instance, debug_utils, messenger));
            }
            device_exts.push(khr::Swapchain::name().as_ptr());
        }
        let ray_tracing = has_extension(&available_exts, khr::AccelerationStructure::name())
            && has_extension(&available_exts, khr::DeferredHostOperations::name());
        if ray_tracing {
            device_exts.push(khr::AccelerationStructure::name().as_ptr());
            device_exts.push(khr::DeferredHostOperations::name().as_ptr());
        } else {
            log::debug!("Acceleration structure builds unavailable on this device");
        }

        let mut features12 = vk::PhysicalDeviceVulkan12Features::builder()
            .timeline_semaphore(true)
            .buffer_device_address(ray_tracing && supported12.buffer_device_address == vk::TRUE)
            .build();
        let mut accel_features = vk::PhysicalDeviceAccelerationStructureFeaturesKHR::builder()
            .acceleration_structure(true)
            .build();
        let mut device_ci = vk::DeviceCreateInfo::builder()
            .enabled_extension_names(&device_exts)
            .queue_create_infos(&queue_infos)
            .push_next(&mut features12);
        if ray_tracing {
            device_ci = device_ci.push_next(&mut accel_features);
        }

        let device = bail!(unsafe { instance.create_device(pdevice, &device_ci, None) });

        let mut created: Vec<(u32, Arc<VulkanQueue>)> = Vec::new();
        for &family in &unique_families {
            let timeline = match unsafe {
                let mut type_ci = vk::SemaphoreTypeCreateInfo::builder()
                    .semaphore_type(vk::SemaphoreType::TIMELINE)
                    .initial_value(0);
                device.create_semaphore(
                    &vk::SemaphoreCreateInfo::builder().push_next(&mut type_ci),
                    None,
                )
            } {
                Ok(t) => t,
                Err(e) => {
                    unsafe {
                        for (_, q) in &created {
                            device.destroy_semaphore(q.timeline, None);
                        }
                        device.destroy_device(None);
                    }
                    return Err((e.into(), instance, debug_utils, messenger));
                }
            };
            let raw = unsafe { device.get_device_queue(family, 0) };
            created.push((
                family,
                Arc::new(VulkanQueue {
                    family,
                    timeline,
                    state: Mutex::new(VulkanQueueState {
                        raw,
                        last_submitted: 0,
                    }),
                }),
            ));
        }
        let find = |family: u32| {
            created
                .iter()
                .find(|(f, _)| *f == family)
                .map(|(_, q)| q.clone())
        };
        let queues = match (find(families[0]), find(families[1]), find(families[2])) {
            (Some(g), Some(c), Some(t)) => [g, c, t],
            _ => {
                unsafe { device.destroy_device(None) };
                return Err((GPUError::NoSuitableDevice, instance, debug_utils, messenger));
            }
        };

        let (surface_loader, swapchain_loader) = if windowed {
            (
                Some(khr::Surface::new(&entry, &instance)),
                Some(khr::Swapchain::new(&instance, &device)),
            )
        } else {
            (None, None)
        };
        let acceleration_structure =
            ray_tracing.then(|| khr::AccelerationStructure::new(&instance, &device));

        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
        log::info!(
            "Vulkan device {:?} (families gfx {}, compute {}, transfer {})",
            name,
            gfx_family,
            compute_family,
            transfer_family
        );

        Ok(Self {
            entry,
            instance,
            pdevice,
            device,
            properties,
            queues,
            debug_utils,
            messenger,
            surface_loader,
            swapchain_loader,
            acceleration_structure,
        })
    }

    pub(crate) fn queue(&self, queue_type: QueueType) -> &Arc<VulkanQueue> {
        &self.queues[queue_type.slot()]
    }

    pub(crate) fn family(&self, queue_type: QueueType) -> u32 {
        self.queue(queue_type).family
    }

    fn unique_queues(&self) -> Vec<&Arc<VulkanQueue>> {
        let mut out: Vec<&Arc<VulkanQueue>> = Vec::new();
        for q in &self.queues {
            if !out.iter().any(|o| Arc::ptr_eq(o, q)) {
                out.push(q);
            }
        }
        out
    }

    pub(crate) fn wait_idle(&self) -> Result<()> {
        for q in self.unique_queues() {
            let state = q.state.lock();
            unsafe { self.device.queue_wait_idle(state.raw) }?;
        }
        Ok(())
    }

    /// Attach a debug name to `obj`. Best effort.
    pub(crate) fn set_name<T>(&self, obj: T, name: &str, t: vk::ObjectType)
    where
        T: vk::Handle,
    {
        let Some(utils) = &self.debug_utils else {
            return;
        };
        if name.is_empty() {
            return;
        }
        let Ok(name) = CString::new(name) else {
            log::warn!("Debug name {:?} contains a NUL byte", name);
            return;
        };
        let res = unsafe {
            utils.set_debug_utils_object_name(
                self.device.handle(),
                &vk::DebugUtilsObjectNameInfoEXT::builder()
                    .object_name(&name)
                    .object_type(t)
                    .object_handle(obj.as_raw())
                    .build(),
            )
        };
        if let Err(e) = res {
            log::warn!("Failed to name {:?} {:?}: {:?}", t, name, e);
        }
    }

    pub(crate) fn debug_utils(&self) -> Option<&ext::DebugUtils> {
        self.debug_utils.as_ref()
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                log::error!("vkDeviceWaitIdle failed during teardown: {:?}", e);
            }
            for q in self.unique_queues() {
                self.device.destroy_semaphore(q.timeline, None);
            }
            self.device.destroy_device(None);
            if let Some(utils) = &self.debug_utils {
                if self.messenger != vk::DebugUtilsMessengerEXT::null() {
                    utils.destroy_debug_utils_messenger(self.messenger, None);
                }
            }
            self.instance.destroy_instance(None);
        }
    }
}
