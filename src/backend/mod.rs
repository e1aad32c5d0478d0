// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash, one file per Vulkan concern.
// The renderer owns the objects; these modules know how to build them.

pub mod buffer;
pub mod commands;
pub mod descriptor;
pub mod device;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod texture;

pub use device::VulkanDevice;
pub use swapchain::Swapchain;

use anyhow::Result;

/// Create one object per input. If a creation fails, the objects made so far
/// are handed to `destroy` (newest first) before the error is returned.
pub fn create_all<I, T, F, D>(inputs: I, mut create: F, mut destroy: D) -> Result<Vec<T>>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Result<T>,
    D: FnMut(T),
{
    let mut created = Vec::new();
    for input in inputs {
        match create(input) {
            Ok(object) => created.push(object),
            Err(e) => {
                while let Some(object) = created.pop() {
                    destroy(object);
                }
                return Err(e);
            }
        }
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_all_keeps_everything_on_success() {
        let mut destroyed = Vec::new();
        let made = create_all(1..=3, |i| Ok(i * 10), |o| destroyed.push(o)).unwrap();

        assert_eq!(made, vec![10, 20, 30]);
        assert!(destroyed.is_empty());
    }

    #[test]
    fn create_all_destroys_partial_results_on_failure() {
        let mut destroyed = Vec::new();
        let result = create_all(
            1..=4,
            |i| {
                if i == 3 {
                    anyhow::bail!("view {} failed", i);
                }
                Ok(i)
            },
            |o| destroyed.push(o),
        );

        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "view 3 failed");
        assert_eq!(destroyed, vec![2, 1]);
    }
}
