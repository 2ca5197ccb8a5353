//! Deterministic ordering of staged images and their partition into rows.
use std::path::PathBuf;

/// Sort paths by filename, ascending. Filenames come from unique blob keys
/// so no tie-break is needed.
pub fn order(mut paths: Vec<PathBuf>) -> Vec<PathBuf> {
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    paths
}

/// Split `ordered` into one group per schema entry, consuming it front to
/// back. A zero entry yields an empty group (a spacer row). Images left over
/// once the schema is exhausted are not used.
pub fn partition<'a, T>(
    ordered: &'a [T],
    schema: &[usize],
) -> Result<Vec<&'a [T]>, errors::SequenceError> {
    let available = ordered.len();
    let requested = schema
        .iter()
        .try_fold(0_usize, |total, &count| total.checked_add(count))
        .unwrap_or(usize::MAX);
    if requested > available {
        return Err(errors::SequenceError::SchemaOverrun {
            requested,
            available,
        });
    }
    let mut rest = ordered;
    Ok(schema
        .iter()
        .map(|&count| {
            let (group, tail) = rest.split_at(count);
            rest = tail;
            group
        })
        .collect())
}

pub mod errors {
    use thiserror::Error;

    #[derive(Debug, Error, PartialEq, Eq)]
    pub enum SequenceError {
        #[error("Schema needs {requested} images but only {available} are staged")]
        SchemaOverrun { requested: usize, available: usize },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_sorts_by_filename_not_full_path() {
        let ordered = order(vec![
            PathBuf::from("/scratch/a/c.jpg"),
            PathBuf::from("/scratch/z/a.jpg"),
            PathBuf::from("/scratch/b.jpg"),
        ]);
        let names: Vec<_> = ordered
            .iter()
            .map(|path| path.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, ["a.jpg", "b.jpg", "c.jpg"]);
    }

    #[test]
    fn order_is_lexicographic() {
        let ordered = order(vec![
            PathBuf::from("10.jpg"),
            PathBuf::from("2.jpg"),
            PathBuf::from("1.jpg"),
        ]);
        assert_eq!(
            ordered,
            [
                PathBuf::from("1.jpg"),
                PathBuf::from("10.jpg"),
                PathBuf::from("2.jpg")
            ]
        );
    }

    #[test]
    fn partition_consumes_in_order_without_gaps_or_repeats() {
        let images: Vec<u32> = (0..10).collect();
        let schemas: [&[usize]; 5] = [&[10], &[1, 2, 3, 4], &[0, 5, 0, 5, 0], &[3, 3], &[]];
        for schema in schemas {
            let groups = partition(&images, schema).unwrap();
            assert_eq!(groups.len(), schema.len());
            for (group, &count) in groups.iter().zip(schema) {
                assert_eq!(group.len(), count);
            }
            let consumed: Vec<u32> = groups.concat();
            let total: usize = schema.iter().sum();
            assert_eq!(consumed, images[..total]);
        }
    }

    #[test]
    fn zero_entries_are_empty_groups() {
        let images = ["a", "b", "c"];
        let groups = partition(&images, &[2, 0, 1]).unwrap();
        assert_eq!(groups, [&["a", "b"][..], &[][..], &["c"][..]]);
    }

    #[test]
    fn spacer_only_schema_needs_no_images() {
        let images: [&str; 0] = [];
        let groups = partition(&images, &[0]).unwrap();
        assert_eq!(groups.len(), 1);
        assert!(groups[0].is_empty());
    }

    #[test]
    fn overrun_is_rejected() {
        let images = ["a", "b", "c"];
        assert_eq!(
            partition(&images, &[2, 2]).unwrap_err(),
            errors::SequenceError::SchemaOverrun {
                requested: 4,
                available: 3
            }
        );
    }

    #[test]
    fn overflowing_schema_is_an_overrun() {
        let images = ["a"];
        assert!(partition(&images, &[usize::MAX, 2]).is_err());
    }

    #[test]
    fn trailing_images_are_ignored() {
        let images = ["a", "b", "c", "d"];
        let groups = partition(&images, &[1, 1]).unwrap();
        assert_eq!(groups, [&["a"][..], &["b"][..]]);
    }
}
