//! The host-facing facade over one runtime instance.

use std::io::Read;

use luna_engine::{State, Status};

use crate::call::{error_from_stack, protected_call, ByMut, ByRef, HostFn, HostFunction, Method};
use crate::config::ContextConfig;
use crate::error::BindResult;
use crate::object::UserData;
use crate::path::{self, IntoPath};
use crate::reader::{FromArgs, FromStack};
use crate::registry::{self, Entry};
use crate::writer::Push;

/// A script runtime together with its bindings.
///
/// Every registration is scoped to this context: dropping it closes the
/// runtime, runs pending finalizers and drops every host value the scripts
/// still hold.
///
/// ```ignore
/// let ctx = Context::new();
/// ctx.write("a", 5)?;
/// assert_eq!(ctx.evaluate::<i32>("return a")?, 5);
/// ```
pub struct Context {
    state: State,
    config: ContextConfig,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Create a context with the default configuration.
    pub fn new() -> Self {
        let config = ContextConfig::default();
        let state = State::with_config(config.runtime.clone());
        if let Err(err) = state.open_libs() {
            state.panic(&format!("failed to open the base library: {}", err));
        }
        Self { state, config }
    }

    /// Create a context with a loaded configuration.
    pub fn with_config(config: ContextConfig) -> BindResult<Self> {
        let state = State::with_config(config.runtime.clone());
        if config.open_default_libs {
            state.open_libs()?;
        }
        tracing::debug!(chunk = %config.chunk_name, "context created");
        Ok(Self { state, config })
    }

    /// The underlying runtime.
    pub fn state(&self) -> &State {
        &self.state
    }

    /// The configuration this context was created with.
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Compile `source` and push it as a function.
    fn load(&self, source: &str) -> BindResult<()> {
        match self.state.load(source, &self.config.chunk_name) {
            Status::Ok => Ok(()),
            status => {
                let err = error_from_stack(&self.state, status);
                self.state.pop(1);
                Err(err)
            }
        }
    }

    /// Run a chunk, discarding whatever it returns.
    pub fn execute(&self, source: &str) -> BindResult<()> {
        self.load(source)?;
        protected_call(&self.state, 0, Some(0))
    }

    /// Run a chunk and read what it returns as `T`.
    ///
    /// A tuple `T` reads one returned value per element.
    pub fn evaluate<T: FromStack>(&self, source: &str) -> BindResult<T> {
        let base = self.state.top();
        self.load(source)?;
        protected_call(&self.state, 0, Some(T::MAX_SLOTS))?;
        let result = T::read_safe(&self.state, base as i32 + 1);
        self.state.set_top(base);
        result
    }

    /// Run a chunk read from `reader`.
    pub fn execute_reader(&self, mut reader: impl Read) -> BindResult<()> {
        let mut source = String::new();
        reader.read_to_string(&mut source)?;
        self.execute(&source)
    }

    /// Read the variable at `path` as `T`.
    pub fn read<T: FromStack>(&self, path: impl IntoPath) -> BindResult<T> {
        path::read(&self.state, &path.into_path())
    }

    /// Store `value` at `path`. `V` must occupy exactly one slot.
    pub fn write<V: Push>(&self, path: impl IntoPath, value: V) -> BindResult<()> {
        path::write(&self.state, &path.into_path(), value)
    }

    /// Store a host closure at `path`.
    pub fn write_function<F, Args, R>(&self, path: impl IntoPath, func: F) -> BindResult<()>
    where
        F: HostFunction<Args, R>,
        Args: FromArgs + 'static,
        R: Push + 'static,
    {
        path::write(&self.state, &path.into_path(), HostFn::new(func))
    }

    /// Whether the variable at `path` exists and is not nil.
    pub fn has_variable(&self, path: impl IntoPath) -> bool {
        path::has_variable(&self.state, &path.into_path())
    }

    /// Attach a method to every shape of `T`.
    ///
    /// The method takes `&T` or `&mut T` first. Methods taking `&mut T` are
    /// not available through the const shapes `Rc<T>` and `Weak<T>`.
    ///
    /// ```ignore
    /// ctx.register_function("increment", |c: &mut Counter| c.value += 1)?;
    /// ```
    pub fn register_function<T, M, Args, R, K>(&self, name: &str, method: M) -> BindResult<()>
    where
        T: UserData,
        M: Method<T, Args, R, K>,
        Args: FromArgs + 'static,
        R: Push + 'static,
        K: 'static,
    {
        registry::install::<T, M, Args, R, K>(&self.state, Entry::Method(name), method)?;
        tracing::debug!(ty = T::type_name(), name, "registered method");
        Ok(())
    }

    /// Detach the method `name` from every shape of `T`.
    pub fn unregister_function<T: UserData>(&self, name: &str) -> BindResult<()> {
        registry::remove_method::<T>(&self.state, name)?;
        Ok(())
    }

    /// Expose a named member with a getter and a setter.
    pub fn register_member<T, V, G, S>(&self, name: &str, getter: G, setter: S) -> BindResult<()>
    where
        T: UserData,
        V: Push + FromStack + 'static,
        G: Fn(&T) -> V + 'static,
        S: Fn(&mut T, V) + 'static,
    {
        registry::install::<T, G, (), V, ByRef>(&self.state, Entry::Getter(name), getter)?;
        registry::install::<T, S, (V,), (), ByMut>(&self.state, Entry::Setter(name), setter)?;
        tracing::debug!(ty = T::type_name(), name, "registered member");
        Ok(())
    }

    /// Expose a named member scripts can read but not assign.
    pub fn register_readonly_member<T, V, G>(&self, name: &str, getter: G) -> BindResult<()>
    where
        T: UserData,
        V: Push + 'static,
        G: Fn(&T) -> V + 'static,
    {
        registry::install::<T, G, (), V, ByRef>(&self.state, Entry::Getter(name), getter)?;
        tracing::debug!(ty = T::type_name(), name, "registered read-only member");
        Ok(())
    }

    /// Handle every member access no named entry matches. The getter and
    /// setter receive the accessed key.
    pub fn register_dynamic_member<T, V, G, S>(&self, getter: G, setter: S) -> BindResult<()>
    where
        T: UserData,
        V: Push + FromStack + 'static,
        G: Fn(&T, String) -> V + 'static,
        S: Fn(&mut T, String, V) + 'static,
    {
        registry::install::<T, G, (String,), V, ByRef>(&self.state, Entry::DefaultGetter, getter)?;
        registry::install::<T, S, (String, V), (), ByMut>(&self.state, Entry::DefaultSetter, setter)?;
        tracing::debug!(ty = T::type_name(), "registered dynamic member");
        Ok(())
    }

    /// Handle every member read no named entry matches.
    pub fn register_readonly_dynamic_member<T, V, G>(&self, getter: G) -> BindResult<()>
    where
        T: UserData,
        V: Push + 'static,
        G: Fn(&T, String) -> V + 'static,
    {
        registry::install::<T, G, (String,), V, ByRef>(&self.state, Entry::DefaultGetter, getter)?;
        tracing::debug!(ty = T::type_name(), "registered read-only dynamic member");
        Ok(())
    }

    /// Compare bound instances of `T` with `eq` when scripts use `==`.
    pub fn register_eq_function<T, F>(&self, eq: F) -> BindResult<()>
    where
        T: UserData,
        F: Fn(&T, &T) -> bool + 'static,
    {
        registry::set_eq::<T, F>(&self.state, eq)
    }

    /// Format bound instances of `T` with `format` in `tostring`.
    pub fn register_to_string_function<T, F>(&self, format: F) -> BindResult<()>
    where
        T: UserData,
        F: Fn(&T) -> String + 'static,
    {
        registry::set_to_string::<T, F>(&self.state, format)
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.state.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BindError;

    #[test]
    fn test_execute_and_evaluate() {
        let ctx = Context::new();
        ctx.execute("x = 20 + 1").unwrap();
        assert_eq!(ctx.evaluate::<i32>("return x * 2").unwrap(), 42);
        let (a, b): (String, bool) = ctx.evaluate("return 'k', x > 1").unwrap();
        assert_eq!((a.as_str(), b), ("k", true));
        assert_eq!(ctx.state().top(), 0);
    }

    #[test]
    fn test_syntax_error() {
        let ctx = Context::new();
        let err = ctx.execute("x = = 1").unwrap_err();
        assert!(matches!(err, BindError::Syntax(_)));
        assert_eq!(ctx.state().top(), 0);
    }

    #[test]
    fn test_deep_nesting_is_a_syntax_error() {
        let ctx = Context::new();
        let source = format!("return {}1{}", "(".repeat(3000), ")".repeat(3000));
        let err = ctx.evaluate::<i32>(&source).unwrap_err();
        assert!(matches!(err, BindError::Syntax(_)));
        assert!(err.to_string().contains("too many syntax levels"));
        assert_eq!(ctx.state().top(), 0);

        let source = format!("return {}1{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(ctx.evaluate::<i32>(&source).unwrap(), 1);
    }

    #[test]
    fn test_config_without_libs() {
        let config = ContextConfig {
            open_default_libs: false,
            ..ContextConfig::default()
        };
        let ctx = Context::with_config(config).unwrap();
        assert!(!ctx.has_variable("print"));
        assert!(Context::new().has_variable("print"));
    }

    #[test]
    fn test_chunk_name_in_errors() {
        let config = ContextConfig {
            chunk_name: "level".to_string(),
            ..ContextConfig::default()
        };
        let ctx = Context::with_config(config).unwrap();
        let err = ctx.execute("error('boom')").unwrap_err();
        assert_eq!(err.to_string(), "level:1: boom");
    }
}
