use std::{
    ffi::{CStr, CString, c_char},
    mem::ManuallyDrop,
};

use ash::vk;
use itertools::Itertools;

use crate::error::{GfxError, GfxResult};

pub struct VulkanCoreCreateInfo {
    pub app_name: String,
    pub enable_validation: bool,
    /// 开启 ray query 与加速结构相关的扩展
    pub enable_ray_query: bool,
    /// 需要呈现时提供，用于查询 surface 相关的 instance 扩展
    pub display_handle: Option<raw_window_handle::RawDisplayHandle>,
}

/// instance、physical device、device、queue 与 vma
///
/// 字段的 drop 顺序由 [`Drop`] 实现显式控制，`entry` 必须最后释放
pub struct VulkanCore {
    pub(crate) instance: ash::Instance,
    debug_messenger: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,

    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) queue_family_index: u32,

    pub(crate) device: ash::Device,
    pub(crate) queue: vk::Queue,

    pub(crate) push_descriptor: ash::khr::push_descriptor::Device,
    pub(crate) acceleration_structure: Option<ash::khr::acceleration_structure::Device>,
    pub(crate) debug_utils: Option<ash::ext::debug_utils::Device>,

    pub(crate) allocator: ManuallyDrop<vk_mem::Allocator>,

    /// 在 drop 之后，会卸载 dll，因此需要确保该字段最后 drop
    pub(crate) entry: ash::Entry,
}

// new & init
impl VulkanCore {
    pub fn new(create_info: &VulkanCoreCreateInfo) -> GfxResult<Self> {
        let _span = kestrel_crate_tools::profile_span!("VulkanCore::new");

        let entry = unsafe { ash::Entry::load() }.map_err(|e| GfxError::Loading(e.to_string()))?;
        let instance = Self::create_instance(&entry, create_info)?;
        let debug_messenger = if create_info.enable_validation {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger = unsafe { loader.create_debug_utils_messenger(&Self::debug_messenger_ci(), None)? };
            Some((loader, messenger))
        } else {
            None
        };

        let (physical_device, queue_family_index) = Self::pick_physical_device(&instance)?;

        let device = Self::create_device(&instance, physical_device, queue_family_index, create_info.enable_ray_query)?;
        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };

        let push_descriptor = ash::khr::push_descriptor::Device::new(&instance, &device);
        let acceleration_structure =
            create_info.enable_ray_query.then(|| ash::khr::acceleration_structure::Device::new(&instance, &device));
        let debug_utils =
            create_info.enable_validation.then(|| ash::ext::debug_utils::Device::new(&instance, &device));

        // vma 需要引用 Instance 以及 Device，因此在其他部分都初始化完成后再创建
        let mut vma_ci = vk_mem::AllocatorCreateInfo::new(&instance, &device, physical_device);
        vma_ci.vulkan_api_version = vk::API_VERSION_1_3;
        vma_ci.flags = vk_mem::AllocatorCreateFlags::BUFFER_DEVICE_ADDRESS;
        let allocator = unsafe { vk_mem::Allocator::new(vma_ci)? };

        Ok(Self {
            instance,
            debug_messenger,
            physical_device,
            queue_family_index,
            device,
            queue,
            push_descriptor,
            acceleration_structure,
            debug_utils,
            allocator: ManuallyDrop::new(allocator),
            entry,
        })
    }

    fn create_instance(entry: &ash::Entry, create_info: &VulkanCoreCreateInfo) -> GfxResult<ash::Instance> {
        let app_name = CString::new(create_info.app_name.as_str()).unwrap_or_default();
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"Kestrel")
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_3);

        let mut exts: Vec<*const c_char> = match create_info.display_handle {
            Some(display) => ash_window::enumerate_required_extensions(display)?.to_vec(),
            None => vec![],
        };
        let mut layers: Vec<*const c_char> = vec![];
        if create_info.enable_validation {
            exts.push(ash::ext::debug_utils::NAME.as_ptr());
            layers.push(c"VK_LAYER_KHRONOS_validation".as_ptr());
        }
        log::info!(
            "instance exts: {}",
            exts.iter().map(|e| unsafe { CStr::from_ptr(*e) }.to_string_lossy()).join(", ")
        );

        let instance_ci = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&exts)
            .enabled_layer_names(&layers);
        Ok(unsafe { entry.create_instance(&instance_ci, None)? })
    }

    /// 优先选择独立显卡，如果没有则选择第一个带有图形队列的显卡
    fn pick_physical_device(instance: &ash::Instance) -> GfxResult<(vk::PhysicalDevice, u32)> {
        let candidates = unsafe { instance.enumerate_physical_devices()? }
            .into_iter()
            .filter_map(|pdevice| {
                let families = unsafe { instance.get_physical_device_queue_family_properties(pdevice) };
                // 全能的 Queue：graphics, compute, transfer
                let required = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER;
                families
                    .iter()
                    .position(|props| props.queue_flags.contains(required))
                    .map(|family| (pdevice, family as u32))
            })
            .collect_vec();

        let is_discrete = |(pdevice, _): &(vk::PhysicalDevice, u32)| {
            let props = unsafe { instance.get_physical_device_properties(*pdevice) };
            props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
        };
        let picked = candidates.into_iter().find_or_first(is_discrete).ok_or(GfxError::NoSuitableDevice)?;

        let props = unsafe { instance.get_physical_device_properties(picked.0) };
        let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) };
        log::info!("found gpu: {:?}, queue family: {}", name, picked.1);
        Ok(picked)
    }

    fn create_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
        enable_ray_query: bool,
    ) -> GfxResult<ash::Device> {
        let mut exts = vec![ash::khr::swapchain::NAME.as_ptr(), ash::khr::push_descriptor::NAME.as_ptr()];
        if enable_ray_query {
            exts.push(ash::khr::acceleration_structure::NAME.as_ptr());
            exts.push(ash::khr::deferred_host_operations::NAME.as_ptr());
            exts.push(ash::khr::ray_query::NAME.as_ptr());
        }

        let queue_priorities = [1.0];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family_index)
            .queue_priorities(&queue_priorities)];

        let mut features13 =
            vk::PhysicalDeviceVulkan13Features::default().dynamic_rendering(true).synchronization2(true);
        let mut features12 = vk::PhysicalDeviceVulkan12Features::default()
            .buffer_device_address(true)
            .timeline_semaphore(true)
            .uniform_buffer_standard_layout(true);
        let mut acc_features =
            vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default().acceleration_structure(true);
        let mut ray_query_features = vk::PhysicalDeviceRayQueryFeaturesKHR::default().ray_query(true);
        let mut features2 = vk::PhysicalDeviceFeatures2::default()
            .features(vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true).shader_int64(true));

        let mut device_ci = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&exts)
            .push_next(&mut features2)
            .push_next(&mut features12)
            .push_next(&mut features13);
        if enable_ray_query {
            device_ci = device_ci.push_next(&mut acc_features).push_next(&mut ray_query_features);
        }

        Ok(unsafe { instance.create_device(physical_device, &device_ci, None)? })
    }

    fn debug_messenger_ci() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
        vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(vk_debug_callback))
    }
}

// tools
impl VulkanCore {
    /// 只有开启 validation 时才会设置
    pub fn set_debug_name<H: vk::Handle>(&self, handle: H, name: &str) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            return;
        };
        let name_info = vk::DebugUtilsObjectNameInfoEXT::default().object_handle(handle).object_name(&name);
        unsafe {
            if let Err(e) = debug_utils.set_debug_utils_object_name(&name_info) {
                log::warn!("failed to set debug name {:?}: {:?}", name, e);
            }
        }
    }
}

impl Drop for VulkanCore {
    fn drop(&mut self) {
        log::info!("destroying vulkan core");
        unsafe {
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
            if let Some((loader, messenger)) = self.debug_messenger.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// debug messenger 的回调函数
unsafe extern "system" fn vk_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    let callback_data = unsafe { *p_callback_data };
    let msg = if callback_data.p_message.is_null() {
        std::borrow::Cow::from("")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("[{:?}] {}", message_type, msg),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("[{:?}] {}", message_type, msg),
        _ => log::info!("[{:?}] {}", message_type, msg),
    };

    // 只有 layer developer 才需要返回 True
    vk::FALSE
}
