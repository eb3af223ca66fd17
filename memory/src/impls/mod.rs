mod ash;

pub use self::ash::{memory_type_properties, non_coherent_atom_size};
