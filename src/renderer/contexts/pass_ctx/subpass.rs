use ash::vk;
use smallvec::SmallVec;

/// One phase of a [`RenderTargetPass`](super::render_pass::RenderTargetPass), naming the
/// attachments it writes, reads and resolves into
#[derive(Debug, Clone, Default)]
pub struct SubPass {
    colors: SmallVec<[u32; 4]>,
    depth: Option<u32>,
    inputs: SmallVec<[(u32, vk::ImageLayout); 4]>,
    resolves: SmallVec<[u32; 4]>,
}

/// Attachment references of a subpass, kept alive while the description points at them
pub(crate) struct SubPassReferences {
    colors: SmallVec<[vk::AttachmentReference; 4]>,
    depth: Option<vk::AttachmentReference>,
    inputs: SmallVec<[vk::AttachmentReference; 4]>,
    resolves: SmallVec<[vk::AttachmentReference; 4]>,
}

impl SubPass {
    /// Written as a color target
    pub fn color(&mut self, attachment: u32) -> &mut Self {
        self.colors.push(attachment);
        self
    }

    /// Written as the depth/stencil target. A subpass has at most one
    pub fn depth(&mut self, attachment: u32) -> &mut Self {
        assert!(self.depth.is_none(), "a subpass can only use one depth attachment");
        self.depth = Some(attachment);
        self
    }

    /// Read as an input attachment in `layout`
    pub fn input(&mut self, attachment: u32, layout: vk::ImageLayout) -> &mut Self {
        self.inputs.push((attachment, layout));
        self
    }

    /// Receives the multisample resolve of the color target at the same position
    pub fn resolve(&mut self, attachment: u32) -> &mut Self {
        self.resolves.push(attachment);
        self
    }

    pub fn colors(&self) -> &[u32] {
        &self.colors
    }

    pub fn depth_attachment(&self) -> Option<u32> {
        self.depth
    }

    pub fn inputs(&self) -> impl Iterator<Item = u32> + '_ {
        self.inputs.iter().map(|(attachment, _)| *attachment)
    }

    pub fn resolves(&self) -> &[u32] {
        &self.resolves
    }

    /// Every attachment index the subpass touches
    pub(crate) fn referenced(&self) -> impl Iterator<Item = u32> + '_ {
        self.colors
            .iter()
            .copied()
            .chain(self.depth)
            .chain(self.inputs())
            .chain(self.resolves.iter().copied())
    }

    pub(crate) fn references(&self) -> SubPassReferences {
        let reference = |attachment: u32, layout: vk::ImageLayout| {
            vk::AttachmentReference::default()
                .attachment(attachment)
                .layout(layout)
        };
        SubPassReferences {
            colors: self
                .colors
                .iter()
                .map(|&attachment| reference(attachment, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL))
                .collect(),
            depth: self
                .depth
                .map(|attachment| reference(attachment, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)),
            inputs: self
                .inputs
                .iter()
                .map(|&(attachment, layout)| reference(attachment, layout))
                .collect(),
            resolves: self
                .resolves
                .iter()
                .map(|&attachment| reference(attachment, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL))
                .collect(),
        }
    }
}

impl SubPassReferences {
    pub(crate) fn description(&self) -> vk::SubpassDescription<'_> {
        let mut description = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&self.colors)
            .input_attachments(&self.inputs);
        if !self.resolves.is_empty() {
            description = description.resolve_attachments(&self.resolves);
        }
        if let Some(depth) = self.depth.as_ref() {
            description = description.depth_stencil_attachment(depth);
        }
        description
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_references_follow_roles() {
        let mut subpass = SubPass::default();
        subpass
            .color(0)
            .color(1)
            .depth(2)
            .input(3, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

        let refs = subpass.references();
        let description = refs.description();
        assert_eq!(description.color_attachment_count, 2);
        assert_eq!(description.input_attachment_count, 1);
        assert!(description.p_resolve_attachments.is_null());
        assert!(!description.p_depth_stencil_attachment.is_null());
        assert_eq!(refs.depth.map(|r| r.layout), Some(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL));
        assert_eq!(refs.inputs[0].layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(subpass.referenced().collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    }

    #[test]
    #[should_panic(expected = "one depth attachment")]
    fn test_second_depth_in_subpass() {
        SubPass::default().depth(1).depth(2);
    }
}
