use rquickjs::qjs::JSMemoryUsage;
use serde::Serialize;

macro_rules! memory_stats {
    ($($field:ident),* $(,)?) => {
        /// Memory counters reported by the engine, copied field by field.
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
        pub struct MemoryStats {
            $(
                #[doc = concat!("`", stringify!($field), "` as reported by the engine.")]
                pub $field: i64,
            )*
        }

        impl MemoryStats {
            /// Every counter as a `(name, value)` pair, in the engine's order.
            pub fn entries(&self) -> impl Iterator<Item = (&'static str, i64)> + '_ {
                [$((stringify!($field), self.$field),)*].into_iter()
            }
        }

        impl From<JSMemoryUsage> for MemoryStats {
            #[allow(clippy::unnecessary_cast)]
            fn from(usage: JSMemoryUsage) -> Self {
                Self {
                    $($field: usage.$field as i64,)*
                }
            }
        }
    };
}

memory_stats!(
    malloc_size,
    malloc_limit,
    memory_used_size,
    malloc_count,
    memory_used_count,
    atom_count,
    atom_size,
    str_count,
    str_size,
    obj_count,
    obj_size,
    prop_count,
    prop_size,
    shape_count,
    shape_size,
    js_func_count,
    js_func_size,
    js_func_code_size,
    js_func_pc2line_count,
    js_func_pc2line_size,
    c_func_count,
    array_count,
    fast_array_count,
    fast_array_elements,
    binary_object_count,
    binary_object_size,
);
