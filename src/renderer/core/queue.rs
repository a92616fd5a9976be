use ash::vk;

/// A retrieved device queue together with the family it was created from.
pub struct Queue {
    pub family_index: u32,
    pub handle: vk::Queue,
}

/// Resolved queue family roles for the selected device. The two roles may
/// land on the same family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    pub fn is_unified(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices in ascending order. The logical device
    /// requests exactly one queue per entry.
    pub fn unique(&self) -> Vec<u32> {
        if self.is_unified() {
            vec![self.graphics]
        } else {
            let mut indices = vec![self.graphics, self.present];
            indices.sort_unstable();
            indices
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_family_is_requested_once() {
        let families = QueueFamilyIndices { graphics: 3, present: 3 };
        assert!(families.is_unified());
        assert_eq!(families.unique(), vec![3]);
    }

    #[test]
    fn distinct_families_are_both_requested() {
        let families = QueueFamilyIndices { graphics: 5, present: 2 };
        assert!(!families.is_unified());
        assert_eq!(families.unique(), vec![2, 5]);
    }
}
