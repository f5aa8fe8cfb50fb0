/// 定义静态缓冲池（`NET_BUF_POOL_DEFINE`）。
///
/// 池在首次访问时构建，名称取静态变量名：
///
/// ```
/// mesh_buf::net_buf_pool_define!(pub static ADV_POOL, 8, 32, 4);
///
/// let buf = ADV_POOL.alloc(mesh_buf::Timeout::NoWait).expect("池未耗尽");
/// assert_eq!(ADV_POOL.name(), "ADV_POOL");
/// drop(buf);
/// ```
///
/// 需要销毁钩子时追加 `destroy = <hook>`，钩子可以是任何实现了 [`DestroyHook`](crate::DestroyHook) 的值。
#[macro_export]
macro_rules! net_buf_pool_define {
    (@destroy) => {
        ::core::option::Option::None
    };
    (@destroy $hook:expr) => {
        ::core::option::Option::Some(
            $crate::__private::Arc::new($hook)
                as $crate::__private::Arc<dyn $crate::DestroyHook>,
        )
    };
    (
        $(#[$meta:meta])*
        $vis:vis static $name:ident, $count:expr, $size:expr, $user_data:expr
        $(, destroy = $hook:expr)? $(,)?
    ) => {
        $(#[$meta])*
        $vis static $name: $crate::__private::Lazy<$crate::NetBufPool> =
            $crate::__private::Lazy::new(|| {
                $crate::NetBufPool::new(
                    ::core::stringify!($name),
                    $count,
                    $size,
                    $user_data,
                    $crate::net_buf_pool_define!(@destroy $($hook)?),
                )
            });
    };
}
