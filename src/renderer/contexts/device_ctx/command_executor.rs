use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::eyre::{eyre, Result};
use crate::renderer::contexts::device_ctx::device::RenderDevice;
use crate::renderer::contexts::device_ctx::queue::Queue;

struct ExecutorState {
    fence: vk::Fence,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
}

/// Records a one-shot command buffer, submits it and blocks until the queue has executed it.
///
/// Calls are serialized: a second caller waits until the first submission has completed.
pub struct CommandExecutor {
    state: Mutex<ExecutorState>,

    queue: Arc<Queue>,
    device: Arc<RenderDevice>,
}

impl CommandExecutor {
    pub fn new(
        device: Arc<RenderDevice>,
        queue: Arc<Queue>,
    ) -> Result<Self> {
        let logical = &device.logical;
        let fence_info = vk::FenceCreateInfo::default();
        let fence = unsafe { logical.create_fence(&fence_info, None)? };

        let command_pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue.family_index())
            .flags(
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
                    | vk::CommandPoolCreateFlags::TRANSIENT,
            );
        let command_pool = match unsafe { logical.create_command_pool(&command_pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { logical.destroy_fence(fence, None) };
                return Err(e.into());
            }
        };

        let command_buffer_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .command_buffer_count(1)
            .level(vk::CommandBufferLevel::PRIMARY);
        let command_buffer = match unsafe { logical.allocate_command_buffers(&command_buffer_info) } {
            Ok(buffers) => buffers[0],
            Err(e) => {
                unsafe {
                    logical.destroy_command_pool(command_pool, None);
                    logical.destroy_fence(fence, None);
                }
                return Err(e.into());
            }
        };

        Ok(Self {
            state: Mutex::new(ExecutorState {
                fence,
                command_pool,
                command_buffer,
            }),
            queue,
            device,
        })
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    /// Records `func` into a fresh command buffer and waits for its completion.
    ///
    /// When `func` fails nothing is submitted and the command buffer is reset so the
    /// executor stays usable.
    pub fn execute<F>(
        &self,
        func: F,
    ) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer, &ash::Device) -> Result<()>,
    {
        let state = self.state.lock().map_err(|e| eyre!(e.to_string()))?;
        let device = &self.device.logical;
        let cmd = state.command_buffer;

        // This command buffer will be used exactly once before resetting
        let cmd_begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            device.begin_command_buffer(cmd, &cmd_begin_info)?;
        }

        let recorded = func(cmd, device);
        let ended = unsafe { device.end_command_buffer(cmd) };
        let submitted = match (recorded, ended) {
            (Ok(()), Ok(())) => self.submit_and_wait(&state),
            (Err(e), _) => Err(e),
            (Ok(()), Err(e)) => Err(e.into()),
        };

        unsafe {
            device.reset_command_pool(
                state.command_pool,
                vk::CommandPoolResetFlags::empty(),
            )?;
        }

        submitted
    }

    fn submit_and_wait(&self, state: &ExecutorState) -> Result<()> {
        let device = &self.device.logical;
        let cmd = [state.command_buffer];
        let submit = vk::SubmitInfo::default()
            .command_buffers(&cmd);
        self.queue.submit(device, &[submit], state.fence)?;

        unsafe {
            // No timeout, a hung device hangs the caller
            device.wait_for_fences(&[state.fence], true, u64::MAX)?;
            device.reset_fences(&[state.fence])?;
        }

        Ok(())
    }
}

impl Drop for CommandExecutor {
    fn drop(&mut self) {
        let state = match self.state.get_mut() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        unsafe {
            self.device.logical.destroy_command_pool(state.command_pool, None);
            self.device.logical.destroy_fence(state.fence, None);
        }
    }
}
