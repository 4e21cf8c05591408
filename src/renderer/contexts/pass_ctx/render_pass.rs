use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use glam::Vec4;
use smallvec::SmallVec;
use crate::renderer::contexts::device_ctx::device::RenderDevice;
use crate::renderer::contexts::pass_ctx::subpass::SubPass;
use crate::renderer::contexts::resource_ctx::format;
use crate::renderer::error::{DriverResultExt, ResourceError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    Color(Vec4),
    DepthStencil { depth: f32, stencil: u32 },
}

impl ClearValue {
    pub fn to_vk(self) -> vk::ClearValue {
        match self {
            ClearValue::Color(color) => vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: color.to_array(),
                },
            },
            ClearValue::DepthStencil { depth, stencil } => vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
            },
        }
    }
}

/// How one attachment is loaded, stored and left behind
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttachmentInfo {
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub clear: ClearValue,
    pub final_layout: vk::ImageLayout,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    /// Receives a multisample resolve instead of being rendered to directly
    pub resolve: bool,
}

impl AttachmentInfo {
    pub fn color(
        format: vk::Format,
        samples: vk::SampleCountFlags,
        clear: Vec4,
        final_layout: vk::ImageLayout,
    ) -> Self {
        Self {
            format,
            samples,
            clear: ClearValue::Color(clear),
            final_layout,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            resolve: false,
        }
    }

    pub fn depth(
        format: vk::Format,
        samples: vk::SampleCountFlags,
        depth: f32,
        stencil: u32,
    ) -> Self {
        Self {
            format,
            samples,
            clear: ClearValue::DepthStencil { depth, stencil },
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            resolve: false,
        }
    }

    pub fn is_depth(&self) -> bool {
        format::is_depth_stencil(self.format)
    }

    pub fn is_multisampled(&self) -> bool {
        self.samples != vk::SampleCountFlags::TYPE_1
    }

    fn description(&self) -> vk::AttachmentDescription {
        vk::AttachmentDescription::default()
            .format(self.format)
            .samples(self.samples)
            .load_op(self.load_op)
            .store_op(self.store_op)
            .stencil_load_op(if format::has_stencil(self.format) {
                self.load_op
            } else {
                vk::AttachmentLoadOp::DONT_CARE
            })
            .stencil_store_op(if format::has_stencil(self.format) {
                self.store_op
            } else {
                vk::AttachmentStoreOp::DONT_CARE
            })
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(self.final_layout)
    }
}

enum PassState {
    Building,
    Finalized {
        handle: vk::RenderPass,
        device: Arc<RenderDevice>,
    },
}

/// Attachments plus the subpasses that read and write them.
///
/// Built up first, then frozen by [`RenderTargetPass::create`]. Frame rings cache formats and
/// clear values from the frozen pass, so any change after that is a bug in the caller and
/// asserts.
pub struct RenderTargetPass {
    attachments: Vec<AttachmentInfo>,
    subpasses: Vec<SubPass>,
    dependencies: Vec<vk::SubpassDependency>,
    depth_index: Option<u32>,
    view_count: u32,
    clear_values: Vec<vk::ClearValue>,
    state: PassState,
}

impl Default for RenderTargetPass {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderTargetPass {
    pub fn new() -> Self {
        Self {
            attachments: Vec::new(),
            subpasses: Vec::new(),
            dependencies: Vec::new(),
            depth_index: None,
            view_count: 1,
            clear_values: Vec::new(),
            state: PassState::Building,
        }
    }

    pub fn add_color_attachment(
        &mut self,
        format: vk::Format,
        samples: vk::SampleCountFlags,
        clear: Vec4,
        final_layout: vk::ImageLayout,
    ) -> u32 {
        self.add_color_attachment_with(AttachmentInfo::color(format, samples, clear, final_layout))
    }

    pub fn add_color_attachment_with(&mut self, info: AttachmentInfo) -> u32 {
        self.assert_building();
        assert!(!info.is_depth(), "{:?} is a depth format, use add_depth_attachment", info.format);
        self.push_attachment(info)
    }

    /// Only one depth/stencil attachment per pass
    pub fn add_depth_attachment(
        &mut self,
        format: vk::Format,
        samples: vk::SampleCountFlags,
        depth: f32,
        stencil: u32,
    ) -> u32 {
        self.assert_building();
        assert!(self.depth_index.is_none(), "render pass already has a depth attachment");
        assert!(format::is_depth_stencil(format), "{:?} is not a depth format", format);

        let index = self.push_attachment(AttachmentInfo::depth(format, samples, depth, stencil));
        self.depth_index = Some(index);
        index
    }

    pub fn add_subpass(&mut self) -> &mut SubPass {
        self.assert_building();
        self.subpasses.push(SubPass::default());
        let last = self.subpasses.len() - 1;
        &mut self.subpasses[last]
    }

    /// Replaces the default dependency chain once any dependency is added
    pub fn add_dependency(&mut self, dependency: vk::SubpassDependency) {
        self.assert_building();
        self.dependencies.push(dependency);
    }

    /// Renders every subpass into `view_count` layers at once
    pub fn multiview(&mut self, view_count: u32) {
        self.assert_building();
        assert!((1..=32).contains(&view_count), "view count must be within 1..=32");
        self.view_count = view_count;
    }

    /// Creates the driver object and freezes the pass
    pub fn create(&mut self, device: Arc<RenderDevice>) -> Result<()> {
        self.assert_building();
        assert!(!self.attachments.is_empty(), "a render pass needs at least one attachment");

        if self.view_count > 1 && !device.supports_multiview() {
            return Err(ResourceError::InvalidUsage("multiview is not supported by the device").into());
        }

        // Nothing on the builder changes until the driver object exists
        let subpass_list = self.frozen_subpasses();
        validate_subpasses(&subpass_list, self.attachments.len() as u32);

        let descriptions = self
            .attachments
            .iter()
            .map(AttachmentInfo::description)
            .collect::<Vec<_>>();
        let references = subpass_list
            .iter()
            .map(SubPass::references)
            .collect::<Vec<_>>();
        let subpasses = references
            .iter()
            .map(|references| references.description())
            .collect::<Vec<_>>();
        let dependencies = if self.dependencies.is_empty() {
            default_dependencies(subpass_list.len() as u32)
        } else {
            self.dependencies.clone()
        };

        let view_mask = view_mask(self.view_count);
        let view_masks = vec![view_mask; subpasses.len()];
        let correlation_masks = [view_mask];
        let mut multiview_info = vk::RenderPassMultiviewCreateInfo::default()
            .view_masks(&view_masks)
            .correlation_masks(&correlation_masks);

        let mut create_info = vk::RenderPassCreateInfo::default()
            .attachments(&descriptions)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        if self.view_count > 1 {
            create_info = create_info.push_next(&mut multiview_info);
        }

        let handle = unsafe { device.logical.create_render_pass(&create_info, None) }
            .driver("vkCreateRenderPass")?;

        self.clear_values = self
            .attachments
            .iter()
            .map(|attachment| attachment.clear.to_vk())
            .collect();
        self.subpasses = subpass_list;
        self.state = PassState::Finalized { handle, device };

        log::info!(
            "Render pass created: {} attachments, {} subpasses, {} views",
            self.attachments.len(),
            self.subpasses.len(),
            self.view_count,
        );
        Ok(())
    }

    pub fn begin(
        &self,
        cmd: vk::CommandBuffer,
        framebuffer: vk::Framebuffer,
        render_area: vk::Rect2D,
        contents: vk::SubpassContents,
    ) {
        let (handle, device) = self.finalized();
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(handle)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(&self.clear_values);
        unsafe {
            device.logical.cmd_begin_render_pass(cmd, &begin_info, contents);
        }
    }

    pub fn next_subpass(&self, cmd: vk::CommandBuffer, contents: vk::SubpassContents) {
        let (_, device) = self.finalized();
        unsafe {
            device.logical.cmd_next_subpass(cmd, contents);
        }
    }

    pub fn end(&self, cmd: vk::CommandBuffer) {
        let (_, device) = self.finalized();
        unsafe {
            device.logical.cmd_end_render_pass(cmd);
        }
    }

    /// Format of the `index`-th color attachment, `UNDEFINED` when there is none
    pub fn color_format(&self, index: usize) -> vk::Format {
        self.color_formats()
            .get(index)
            .copied()
            .unwrap_or(vk::Format::UNDEFINED)
    }

    pub fn color_formats(&self) -> SmallVec<[vk::Format; 4]> {
        self.attachments
            .iter()
            .filter(|attachment| !attachment.is_depth())
            .map(|attachment| attachment.format)
            .collect()
    }

    pub fn depth_format(&self) -> Option<vk::Format> {
        self.depth_index
            .map(|index| self.attachments[index as usize].format)
    }

    pub fn depth_index(&self) -> Option<u32> {
        self.depth_index
    }

    /// Highest sample count among the attachments
    pub fn samples(&self) -> vk::SampleCountFlags {
        self.attachments
            .iter()
            .map(|attachment| attachment.samples)
            .max_by_key(|samples| samples.as_raw())
            .unwrap_or(vk::SampleCountFlags::TYPE_1)
    }

    /// Empty until the pass is created
    pub fn clear_values(&self) -> &[vk::ClearValue] {
        &self.clear_values
    }

    pub fn attachments(&self) -> &[AttachmentInfo] {
        &self.attachments
    }

    pub fn subpasses(&self) -> &[SubPass] {
        &self.subpasses
    }

    pub fn subpass_count(&self) -> usize {
        self.subpasses.len()
    }

    pub fn view_count(&self) -> u32 {
        self.view_count
    }

    pub fn is_finalized(&self) -> bool {
        matches!(self.state, PassState::Finalized { .. })
    }

    /// Null until the pass is created
    pub fn handle(&self) -> vk::RenderPass {
        match &self.state {
            PassState::Finalized { handle, .. } => *handle,
            PassState::Building => vk::RenderPass::null(),
        }
    }

    fn push_attachment(&mut self, info: AttachmentInfo) -> u32 {
        self.attachments.push(info);
        (self.attachments.len() - 1) as u32
    }

    /// One subpass writing every attachment, multisampled colors resolving into the
    /// single-sampled ones marked as resolve targets
    fn default_subpass(&self) -> SubPass {
        let mut subpass = SubPass::default();
        for (index, attachment) in self.attachments.iter().enumerate() {
            let index = index as u32;
            if attachment.is_depth() {
                if Some(index) == self.depth_index {
                    subpass.depth(index);
                }
            } else if attachment.resolve {
                subpass.resolve(index);
            } else {
                subpass.color(index);
            }
        }
        subpass
    }

    /// The subpasses the driver object is built from: the declared ones, or the default one
    /// when none were declared
    fn frozen_subpasses(&self) -> Vec<SubPass> {
        if self.subpasses.is_empty() {
            vec![self.default_subpass()]
        } else {
            self.subpasses.clone()
        }
    }

    fn assert_building(&self) {
        assert!(
            !self.is_finalized(),
            "render pass cannot be modified after it has been created"
        );
    }

    fn finalized(&self) -> (vk::RenderPass, &Arc<RenderDevice>) {
        match &self.state {
            PassState::Finalized { handle, device } => (*handle, device),
            PassState::Building => panic!("render pass has not been created"),
        }
    }
}

impl Drop for RenderTargetPass {
    fn drop(&mut self) {
        if let PassState::Finalized { handle, device } = &self.state {
            unsafe {
                device.logical.destroy_render_pass(*handle, None);
            }
        }
    }
}

fn validate_subpasses(subpasses: &[SubPass], attachment_count: u32) {
    for (i, subpass) in subpasses.iter().enumerate() {
        if let Some(index) = subpass.referenced().find(|index| *index >= attachment_count) {
            panic!(
                "subpass {} references attachment {} but the pass has {}",
                i, index, attachment_count
            );
        }
        assert!(
            subpass.resolves().is_empty() || subpass.resolves().len() == subpass.colors().len(),
            "subpass {} must resolve every color attachment or none",
            i,
        );
    }
}

fn view_mask(view_count: u32) -> u32 {
    u32::MAX >> (32 - view_count)
}

/// External -> first, each subpass -> the next, last -> external
fn default_dependencies(subpass_count: u32) -> Vec<vk::SubpassDependency> {
    let attachment_stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    let attachment_writes = vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;

    let mut dependencies = Vec::with_capacity(subpass_count as usize + 1);
    dependencies.push(
        vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(attachment_stages)
            .dst_stage_mask(attachment_stages)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(attachment_writes),
    );
    for subpass in 1..subpass_count {
        dependencies.push(
            vk::SubpassDependency::default()
                .src_subpass(subpass - 1)
                .dst_subpass(subpass)
                .src_stage_mask(attachment_stages)
                .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
                .src_access_mask(attachment_writes)
                .dst_access_mask(vk::AccessFlags::INPUT_ATTACHMENT_READ | vk::AccessFlags::SHADER_READ)
                .dependency_flags(vk::DependencyFlags::BY_REGION),
        );
    }
    dependencies.push(
        vk::SubpassDependency::default()
            .src_subpass(subpass_count - 1)
            .dst_subpass(vk::SUBPASS_EXTERNAL)
            .src_stage_mask(attachment_stages)
            .dst_stage_mask(vk::PipelineStageFlags::TRANSFER | vk::PipelineStageFlags::FRAGMENT_SHADER)
            .src_access_mask(attachment_writes)
            .dst_access_mask(vk::AccessFlags::TRANSFER_READ | vk::AccessFlags::SHADER_READ),
    );
    dependencies
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLOR: vk::Format = vk::Format::B8G8R8A8_UNORM;
    const DEPTH: vk::Format = vk::Format::D32_SFLOAT;

    fn color_depth_pass() -> RenderTargetPass {
        let mut pass = RenderTargetPass::new();
        let color = pass.add_color_attachment(
            COLOR,
            vk::SampleCountFlags::TYPE_1,
            Vec4::new(1.0, 0.0, 0.0, 1.0),
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
        let depth = pass.add_depth_attachment(DEPTH, vk::SampleCountFlags::TYPE_1, 1.0, 0);
        pass.add_subpass().color(color).depth(depth);
        pass
    }

    #[test]
    fn test_formats_and_indices() {
        let pass = color_depth_pass();
        assert_eq!(pass.color_format(0), COLOR);
        assert_eq!(pass.color_format(1), vk::Format::UNDEFINED);
        assert_eq!(pass.depth_format(), Some(DEPTH));
        assert_eq!(pass.depth_index(), Some(1));
        assert_eq!(pass.subpass_count(), 1);
        assert_eq!(pass.samples(), vk::SampleCountFlags::TYPE_1);
        assert!(!pass.is_finalized());
        assert_eq!(pass.handle(), vk::RenderPass::null());
    }

    #[test]
    #[should_panic(expected = "already has a depth attachment")]
    fn test_second_depth_attachment() {
        let mut pass = color_depth_pass();
        pass.add_depth_attachment(DEPTH, vk::SampleCountFlags::TYPE_1, 1.0, 0);
    }

    #[test]
    #[should_panic(expected = "is a depth format")]
    fn test_depth_format_as_color() {
        let mut pass = RenderTargetPass::new();
        pass.add_color_attachment(
            DEPTH,
            vk::SampleCountFlags::TYPE_1,
            Vec4::ZERO,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
    }

    #[test]
    fn test_default_subpass_resolves_msaa() {
        let mut pass = RenderTargetPass::new();
        let msaa = pass.add_color_attachment(
            COLOR,
            vk::SampleCountFlags::TYPE_4,
            Vec4::ZERO,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
        let depth = pass.add_depth_attachment(DEPTH, vk::SampleCountFlags::TYPE_4, 1.0, 0);
        let target = pass.add_color_attachment_with(AttachmentInfo {
            resolve: true,
            ..AttachmentInfo::color(
                COLOR,
                vk::SampleCountFlags::TYPE_1,
                Vec4::ZERO,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            )
        });

        let subpass = pass.default_subpass();
        assert_eq!(subpass.colors(), &[msaa]);
        assert_eq!(subpass.depth_attachment(), Some(depth));
        assert_eq!(subpass.resolves(), &[target]);
        assert_eq!(pass.samples(), vk::SampleCountFlags::TYPE_4);
    }

    #[test]
    #[should_panic(expected = "references attachment 5")]
    fn test_out_of_range_reference() {
        let mut pass = color_depth_pass();
        pass.add_subpass().color(5);
        validate_subpasses(pass.subpasses(), pass.attachments().len() as u32);
    }

    #[test]
    fn test_default_subpass_leaves_builder_untouched() {
        let mut pass = RenderTargetPass::new();
        pass.add_color_attachment(
            COLOR,
            vk::SampleCountFlags::TYPE_1,
            Vec4::ZERO,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
        for _ in 0..2 {
            assert_eq!(pass.frozen_subpasses().len(), 1);
        }
        assert_eq!(pass.subpass_count(), 0);

        pass.add_subpass().color(0);
        pass.add_subpass().color(0);
        assert_eq!(pass.frozen_subpasses().len(), 2);
    }

    #[test]
    fn test_default_dependencies_chain_subpasses() {
        let dependencies = default_dependencies(3);
        let pairs = dependencies
            .iter()
            .map(|d| (d.src_subpass, d.dst_subpass))
            .collect::<Vec<_>>();
        assert_eq!(
            pairs,
            vec![
                (vk::SUBPASS_EXTERNAL, 0),
                (0, 1),
                (1, 2),
                (2, vk::SUBPASS_EXTERNAL),
            ]
        );
    }

    #[test]
    fn test_view_mask() {
        assert_eq!(view_mask(1), 0b1);
        assert_eq!(view_mask(2), 0b11);
        assert_eq!(view_mask(32), u32::MAX);
    }

    #[test]
    fn test_clear_value_conversion() {
        let value = ClearValue::DepthStencil { depth: 1.0, stencil: 7 }.to_vk();
        let depth_stencil = unsafe { value.depth_stencil };
        assert_eq!(depth_stencil.depth, 1.0);
        assert_eq!(depth_stencil.stencil, 7);
    }
}
