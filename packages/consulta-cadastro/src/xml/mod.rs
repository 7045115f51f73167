//! XML primitives shared by the request codec and the response parser.

mod utils;
mod writer;

pub use utils::{
    child_text, element_children, find_child, find_child_matching, find_child_tolerant,
    find_children, find_element, get_tag_name, get_text, is_unqualified, is_well_formed, ElementMatch,
};
pub use writer::{collapse_whitespace, serialize_subtree, XmlDocument, XmlWriter};
