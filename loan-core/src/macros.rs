//! Module containing utility macros for sharing in the crate.

/// Macro for instantiating a `HashMap`.
#[cfg(test)]
macro_rules! hash_map {
    ($( $key:expr => $value:expr ),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut map = std::collections::HashMap::new();
        $(
            map.insert(($key).to_owned(), $value);
        )*
        map
    }}
}
