use pyhook_proto::WireObject;

use crate::runtime::{Object, ObjectKind, ObjectRef};

/// Text displayed in place of a `repr` that raised.
pub const REPR_FAILED: &str = "repr raised an exception";

/// Maximum number of children enumerated from a single value.
pub const MAX_CHILDREN: usize = 10_000;

const HALTED_NAME: &str = "[...]";
const HALTED_TEXT: &str = "Evaluation halted because sequence included too many items...";

const UNDEFINED_TEXT: &str = "<undefined>";

/// Converts a runtime value into its wire form.
///
/// Never fails: a failing `repr` yields [REPR_FAILED].
pub fn marshal(object: &dyn Object) -> WireObject {
    WireObject {
        repr: Some(safe_repr(object)),
        hex_repr: object.hex(),
        type_name: Some(object.type_name()),
        expandable: !object.kind().is_leaf(),
    }
}

/// Returns the `repr` of a value, or [REPR_FAILED].
pub fn safe_repr(object: &dyn Object) -> String {
    object.repr().unwrap_or_else(|_| REPR_FAILED.to_owned())
}

/// Wire form of a variable that is not bound yet.
pub fn undefined() -> WireObject {
    text_object(UNDEFINED_TEXT)
}

fn text_object(text: &str) -> WireObject {
    WireObject {
        repr: Some(format!("'{text}'")),
        hex_repr: None,
        type_name: Some("str".to_owned()),
        expandable: false,
    }
}

/// Children of an expanded value.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Children {
    /// Named children, in display order.
    pub items: Vec<(String, WireObject)>,
    /// Children are indexed (`[key]` names).
    pub is_index: bool,
    /// Children can only be fetched back through enumeration.
    pub is_enumerate: bool,
}

/// Enumerates the children of a value.
///
/// Mapping-like values yield their items, iterable values their elements
/// (both as `[key]` names), and every other value (generators included) its
/// non-callable, non-dunder attributes.
pub fn enum_children(value: &ObjectRef) -> Children {
    if value.kind() != ObjectKind::Generator {
        if let Some(children) = indexed_children(value) {
            return children;
        }
    }

    named_children(value)
}

fn indexed_children(value: &ObjectRef) -> Option<Children> {
    let mut children = Children {
        is_index: true,
        ..Default::default()
    };

    if let Some(items) = value.items() {
        for item in items.ok()? {
            let (key, item) = item.ok()?;

            if children.items.len() >= MAX_CHILDREN {
                children.items.push(halted());
                break;
            }

            children
                .items
                .push((format!("[{}]", safe_repr(&*key)), marshal(&*item)));
        }

        return Some(children);
    }

    for (index, item) in value.iter()?.ok()?.enumerate() {
        let item = item.ok()?;

        if children.items.len() >= MAX_CHILDREN {
            children.items.push(halted());
            break;
        }

        children
            .items
            .push((format!("[{index}]"), marshal(&*item)));

        if !children.is_enumerate {
            // check whether the element can be fetched back by index
            children.is_enumerate = match value.index(index) {
                Ok(fetched) => !fetched.is_same(&*item),
                Err(_) => true,
            };
        }
    }

    Some(children)
}

fn named_children(value: &ObjectRef) -> Children {
    let items = value
        .dir()
        .into_iter()
        .filter(|name| !(name.starts_with("__") && name.ends_with("__")))
        .filter_map(|name| {
            let attr = value.get_attr(&name).ok()?;
            (!attr.is_callable()).then(|| (name, marshal(&*attr)))
        })
        .collect();

    Children {
        items,
        is_index: false,
        is_enumerate: false,
    }
}

fn halted() -> (String, WireObject) {
    (HALTED_NAME.to_owned(), text_object(HALTED_TEXT))
}

/// Splits an enumerated child expression (`expr[N]`) into `expr` and `N`.
pub fn split_enumerated_child(text: &str) -> Option<(&str, usize)> {
    let inner = text.strip_suffix(']')?;
    let open = inner.rfind('[')?;

    let index = inner[open + 1..].trim().parse().ok()?;
    Some((&inner[..open], index))
}
