use std::fs;
use std::io::Cursor;
use std::path::Path;

use ash::prelude::VkResult;
use ash::vk;
use color_eyre::Result;

use crate::renderer::config::RenderConfig;
use crate::renderer::error::{ApiOp, RenderError};

/// The fixed render pass, graphics pipeline, and per-image framebuffers
pub struct RenderPipeline {
    pub render_pass: vk::RenderPass,
    pub layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
    pub framebuffers: Vec<vk::Framebuffer>,
}

impl RenderPipeline {
    pub fn new(
        device: &ash::Device,
        config: &RenderConfig,
        format: vk::Format,
        extent: vk::Extent2D,
        image_views: &[vk::ImageView],
    ) -> Result<Self> {
        let render_pass = Self::create_render_pass(device, format)?;
        let (layout, pipeline) = Self::create_pipeline(device, config, extent, render_pass)?;
        let framebuffers = Self::create_framebuffers(device, render_pass, extent, image_views)?;

        Ok(Self {
            render_pass,
            layout,
            pipeline,
            framebuffers,
        })
    }

    fn create_render_pass(device: &ash::Device, format: vk::Format) -> Result<vk::RenderPass> {
        let color_attachment = vk::AttachmentDescription::default()
            .format(format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

        let color_attachment_ref = vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

        let subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(std::slice::from_ref(&color_attachment_ref));

        // The acquire semaphore gates the color-output stage, so the implicit
        // UNDEFINED -> COLOR_ATTACHMENT_OPTIMAL transition must not begin
        // before that stage either.
        let dependency = vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE);

        let render_pass_info = vk::RenderPassCreateInfo::default()
            .attachments(std::slice::from_ref(&color_attachment))
            .subpasses(std::slice::from_ref(&subpass))
            .dependencies(std::slice::from_ref(&dependency));

        let render_pass = unsafe {
            device
                .create_render_pass(&render_pass_info, None)
                .map_err(|r| RenderError::api(ApiOp::CreateRenderPass, r))?
        };
        Ok(render_pass)
    }

    fn create_pipeline(
        device: &ash::Device,
        config: &RenderConfig,
        extent: vk::Extent2D,
        render_pass: vk::RenderPass,
    ) -> Result<(vk::PipelineLayout, vk::Pipeline)> {
        let vert_words = Self::load_shader_words(&config.vertex_shader_path)?;
        let frag_words = Self::load_shader_words(&config.fragment_shader_path)?;

        let vert_module = Self::create_shader_module(device, &vert_words)?;
        let frag_module = Self::create_shader_module(device, &frag_words)?;

        let entry_point = c"main";
        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vert_module)
                .name(entry_point),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(frag_module)
                .name(entry_point),
        ];

        // The triangle's vertices live in the vertex shader; nothing is bound.
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default();

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewport = vk::Viewport::default()
            .x(0.0)
            .y(0.0)
            .width(extent.width as f32)
            .height(extent.height as f32)
            .min_depth(0.0)
            .max_depth(1.0);
        let scissor = vk::Rect2D::default()
            .offset(vk::Offset2D { x: 0, y: 0 })
            .extent(extent);
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(std::slice::from_ref(&viewport))
            .scissors(std::slice::from_ref(&scissor));

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::CLOCKWISE)
            .depth_bias_enable(false);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false);

        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(std::slice::from_ref(&color_blend_attachment))
            .blend_constants([0.0; 4]);

        // No descriptor sets and no push constants; the pipeline takes no
        // external parameters.
        let layout_info = vk::PipelineLayoutCreateInfo::default();
        let layout = unsafe {
            device
                .create_pipeline_layout(&layout_info, None)
                .map_err(|r| RenderError::api(ApiOp::CreatePipelineLayout, r))?
        };

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .color_blend_state(&color_blend_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0);

        let pipeline = unsafe {
            device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, r)| RenderError::api(ApiOp::CreatePipeline, r))?[0]
        };

        // The modules only feed pipeline creation; the pipeline keeps its own
        // copy of the code.
        unsafe {
            device.destroy_shader_module(frag_module, None);
            device.destroy_shader_module(vert_module, None);
        }

        Ok((layout, pipeline))
    }

    fn load_shader_words(path: &Path) -> Result<Vec<u32>> {
        let bytes = fs::read(path).map_err(|source| RenderError::ShaderLoad {
            path: path.to_path_buf(),
            source,
        })?;
        let words = decode_spirv(&bytes, path)?;
        Ok(words)
    }

    fn create_shader_module(device: &ash::Device, words: &[u32]) -> Result<vk::ShaderModule> {
        let module_info = vk::ShaderModuleCreateInfo::default().code(words);
        let module = unsafe {
            device
                .create_shader_module(&module_info, None)
                .map_err(|r| RenderError::api(ApiOp::CreateShaderModule, r))?
        };
        Ok(module)
    }

    fn create_framebuffers(
        device: &ash::Device,
        render_pass: vk::RenderPass,
        extent: vk::Extent2D,
        image_views: &[vk::ImageView],
    ) -> Result<Vec<vk::Framebuffer>> {
        let framebuffers = image_views
            .iter()
            .map(|view| {
                let framebuffer_info = vk::FramebufferCreateInfo::default()
                    .render_pass(render_pass)
                    .attachments(std::slice::from_ref(view))
                    .width(extent.width)
                    .height(extent.height)
                    .layers(1);
                unsafe { device.create_framebuffer(&framebuffer_info, None) }
            })
            .collect::<VkResult<Vec<_>>>()
            .map_err(|r| RenderError::api(ApiOp::CreateFramebuffer, r))?;
        Ok(framebuffers)
    }

    /// # Safety
    /// All GPU work using the pipeline must have retired.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                device.destroy_framebuffer(framebuffer, None);
            }
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
            device.destroy_render_pass(self.render_pass, None);
        }
    }
}

/// SPIR-V must reach the device as properly aligned 32-bit words; `read_spv`
/// enforces the size and magic-number contract the blob is opaque behind.
fn decode_spirv(bytes: &[u8], path: &Path) -> Result<Vec<u32>, RenderError> {
    ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|source| RenderError::ShaderLoad {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_word_aligned_bytecode() {
        // SPIR-V magic number in little-endian byte order, plus one word.
        let bytes = [0x03, 0x02, 0x23, 0x07, 0x00, 0x00, 0x01, 0x00];
        let words = decode_spirv(&bytes, Path::new("ok.spv")).unwrap();
        assert_eq!(words[0], 0x0723_0203);
        assert_eq!(words.len(), 2);
    }

    #[test]
    fn rejects_unaligned_bytecode() {
        let bytes = [0x03, 0x02, 0x23];
        let err = decode_spirv(&bytes, Path::new("bad.spv")).unwrap_err();
        assert!(matches!(err, RenderError::ShaderLoad { .. }));
    }

    #[test]
    fn missing_shader_file_is_a_load_error() {
        let err = RenderPipeline::load_shader_words(Path::new("no/such/shader.spv"))
            .unwrap_err()
            .downcast::<RenderError>()
            .unwrap();
        match err {
            RenderError::ShaderLoad { path, .. } => {
                assert_eq!(path, Path::new("no/such/shader.spv"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
