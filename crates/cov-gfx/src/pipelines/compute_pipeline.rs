use std::{ffi::CStr, rc::Rc};

use ash::vk;
use itertools::Itertools;

use crate::{
    error::{GfxResult, VkResultExt},
    foundation::{debug_messenger::DebugType, device::GfxDevice},
    pipelines::shader::ShaderModule,
};

/// 创建 compute pipeline 所需的参数
///
/// 每个 storage buffer 独占一个 descriptor set，binding 都是 0，
/// set index 就是 buffer 在 `storage_buffers` 中的下标
pub struct GfxComputePipelineCreateInfo<'a> {
    pub shader_code: &'a [u32],
    pub entry_point: &'a CStr,
    pub spec_map_entries: &'a [vk::SpecializationMapEntry],
    pub spec_data: &'a [u8],
    pub storage_buffers: &'a [vk::Buffer],
    pub debug_name: &'a str,
}

/// 只在创建 pipeline 和录制命令期间需要的对象
///
/// 命令录制结束之后就可以释放
#[derive(Default)]
struct BuildObjects {
    shader_module: Option<ShaderModule>,
    pipeline_cache: vk::PipelineCache,
    pipeline_layout: vk::PipelineLayout,
    set_layouts: Vec<vk::DescriptorSetLayout>,
}

impl BuildObjects {
    fn destroy(&mut self, gfx_device: &GfxDevice) {
        unsafe {
            if let Some(module) = self.shader_module.take() {
                module.destroy();
            }
            if self.pipeline_cache != vk::PipelineCache::null() {
                gfx_device.destroy_pipeline_cache(self.pipeline_cache, None);
                self.pipeline_cache = vk::PipelineCache::null();
            }
            if self.pipeline_layout != vk::PipelineLayout::null() {
                gfx_device.destroy_pipeline_layout(self.pipeline_layout, None);
                self.pipeline_layout = vk::PipelineLayout::null();
            }
            for layout in self.set_layouts.drain(..) {
                gfx_device.destroy_descriptor_set_layout(layout, None);
            }
        }
    }
}

/// compute pipeline 以及它的 descriptor 资源
///
/// 生命周期分为两段：
/// - `release_build_objects`：录制结束后释放 shader module，pipeline cache，pipeline layout，set layouts
/// - `destroy`：GPU 执行完毕之后释放 pipeline 和 descriptor pool
pub struct GfxComputePipeline {
    pipeline: vk::Pipeline,
    descriptor_pool: vk::DescriptorPool,
    descriptor_sets: Vec<vk::DescriptorSet>,

    build_objects: BuildObjects,

    gfx_device: Rc<GfxDevice>,
    debug_name: String,

    #[cfg(debug_assertions)]
    destroyed: bool,
}

// 创建与销毁
impl GfxComputePipeline {
    pub fn new(gfx_device: Rc<GfxDevice>, ci: &GfxComputePipelineCreateInfo) -> GfxResult<Self> {
        // 创建失败时，已经创建的对象需要全部释放
        let mut pipeline = scopeguard::guard(
            Self {
                pipeline: vk::Pipeline::null(),
                descriptor_pool: vk::DescriptorPool::null(),
                descriptor_sets: Vec::new(),
                build_objects: BuildObjects::default(),
                gfx_device: gfx_device.clone(),
                debug_name: ci.debug_name.to_string(),

                #[cfg(debug_assertions)]
                destroyed: false,
            },
            |pipeline| pipeline.destroy(),
        );

        pipeline.build_objects.shader_module = Some(ShaderModule::new(gfx_device.clone(), ci.shader_code, ci.debug_name)?);
        pipeline.create_descriptors(ci.storage_buffers)?;
        pipeline.create_layout_and_cache()?;
        pipeline.create_pipeline(ci)?;

        let pipeline = scopeguard::ScopeGuard::into_inner(pipeline);
        gfx_device.set_debug_name(&pipeline, ci.debug_name);
        Ok(pipeline)
    }

    /// 每个 buffer 一个 set，每个 set 只有 binding 0
    fn create_descriptors(&mut self, storage_buffers: &[vk::Buffer]) -> GfxResult<()> {
        if storage_buffers.is_empty() {
            return Ok(());
        }
        let set_count = storage_buffers.len() as u32;

        let binding = vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::COMPUTE);
        for _ in storage_buffers {
            let layout = unsafe {
                self.gfx_device
                    .create_descriptor_set_layout(
                        &vk::DescriptorSetLayoutCreateInfo::default().bindings(std::slice::from_ref(&binding)),
                        None,
                    )
                    .vk_context("vkCreateDescriptorSetLayout")?
            };
            self.build_objects.set_layouts.push(layout);
        }

        let pool_size = vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_BUFFER,
            descriptor_count: set_count,
        };
        self.descriptor_pool = unsafe {
            self.gfx_device
                .create_descriptor_pool(
                    &vk::DescriptorPoolCreateInfo::default()
                        .max_sets(set_count)
                        .pool_sizes(std::slice::from_ref(&pool_size)),
                    None,
                )
                .vk_context("vkCreateDescriptorPool")?
        };

        self.descriptor_sets = unsafe {
            self.gfx_device
                .allocate_descriptor_sets(
                    &vk::DescriptorSetAllocateInfo::default()
                        .descriptor_pool(self.descriptor_pool)
                        .set_layouts(&self.build_objects.set_layouts),
                )
                .vk_context("vkAllocateDescriptorSets")?
        };

        let buffer_infos = storage_buffers
            .iter()
            .map(|buffer| vk::DescriptorBufferInfo {
                buffer: *buffer,
                offset: 0,
                range: vk::WHOLE_SIZE,
            })
            .collect_vec();
        let writes = self
            .descriptor_sets
            .iter()
            .zip(buffer_infos.iter())
            .map(|(set, info)| {
                vk::WriteDescriptorSet::default()
                    .dst_set(*set)
                    .dst_binding(0)
                    .dst_array_element(0)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .buffer_info(std::slice::from_ref(info))
            })
            .collect_vec();
        unsafe {
            self.gfx_device.update_descriptor_sets(&writes, &[]);
        }
        Ok(())
    }

    fn create_layout_and_cache(&mut self) -> GfxResult<()> {
        unsafe {
            self.build_objects.pipeline_layout = self
                .gfx_device
                .create_pipeline_layout(
                    &vk::PipelineLayoutCreateInfo::default().set_layouts(&self.build_objects.set_layouts),
                    None,
                )
                .vk_context("vkCreatePipelineLayout")?;
            self.build_objects.pipeline_cache = self
                .gfx_device
                .create_pipeline_cache(&vk::PipelineCacheCreateInfo::default(), None)
                .vk_context("vkCreatePipelineCache")?;
        }
        Ok(())
    }

    fn create_pipeline(&mut self, ci: &GfxComputePipelineCreateInfo) -> GfxResult<()> {
        let Some(shader_module) = self.build_objects.shader_module.as_ref() else {
            return Ok(());
        };
        let spec_info = vk::SpecializationInfo::default().map_entries(ci.spec_map_entries).data(ci.spec_data);
        let mut stage_info = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader_module.handle())
            .name(ci.entry_point);
        if !ci.spec_map_entries.is_empty() {
            stage_info = stage_info.specialization_info(&spec_info);
        }

        let pipeline_ci =
            vk::ComputePipelineCreateInfo::default().stage(stage_info).layout(self.build_objects.pipeline_layout);
        let pipelines = unsafe {
            self.gfx_device
                .create_compute_pipelines(self.build_objects.pipeline_cache, std::slice::from_ref(&pipeline_ci), None)
                .map_err(|(_, e)| e)
                .vk_context("vkCreateComputePipelines")?
        };
        self.pipeline = pipelines[0];
        Ok(())
    }

    /// 录制结束之后调用；重复调用是安全的
    pub fn release_build_objects(&mut self) {
        self.build_objects.destroy(&self.gfx_device);
    }

    pub fn destroy(mut self) {
        log::debug!("destroying compute pipeline: {}", self.debug_name);
        self.build_objects.destroy(&self.gfx_device);
        unsafe {
            if self.pipeline != vk::Pipeline::null() {
                self.gfx_device.destroy_pipeline(self.pipeline, None);
            }
            // descriptor sets 随 pool 一起释放
            if self.descriptor_pool != vk::DescriptorPool::null() {
                self.gfx_device.destroy_descriptor_pool(self.descriptor_pool, None);
            }
        }
        #[cfg(debug_assertions)]
        {
            self.destroyed = true;
        }
    }
}

// getters
impl GfxComputePipeline {
    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// 只有在 `release_build_objects` 之前有效
    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.build_objects.pipeline_layout
    }

    #[inline]
    pub fn descriptor_sets(&self) -> &[vk::DescriptorSet] {
        &self.descriptor_sets
    }

    #[inline]
    pub fn build_objects_released(&self) -> bool {
        self.build_objects.shader_module.is_none() && self.build_objects.pipeline_layout == vk::PipelineLayout::null()
    }

    #[inline]
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }
}

impl Drop for GfxComputePipeline {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        debug_assert!(self.destroyed, "GfxComputePipeline {} must be destroyed manually before drop.", self.debug_name);
    }
}

impl DebugType for GfxComputePipeline {
    fn debug_type_name() -> &'static str {
        "GfxComputePipeline"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.pipeline
    }
}
