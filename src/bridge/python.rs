//! Python as the embedded runtime
//!
//! Arrays become NumPy views over the caller's buffer, opaque pointers
//! become `ctypes.c_void_p`, and modules are executed from their source file
//! through `importlib` without generating any Python source.

use core::ffi::c_void;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use pyo3::exceptions::PyImportError;
use pyo3::prelude::*;
use pyo3::types::{PyModule, PyTuple};

use super::{EmbeddedRuntime, Returned, RuntimeException, SELF_CONSTRUCTOR};
use crate::errors::{DispatchError, ErrorKind, Result};
use crate::protocol::Lang;

/// Wrapper factory loaded into the interpreter on first callback use
const CALLBACK_MODULE: &str = include_str!("callback.py");

/// One interpreter per process
static CLAIMED: AtomicBool = AtomicBool::new(false);

pub struct PythonRuntime {
    numpy: Option<PyObject>,
}

impl PythonRuntime {
    /// Claim the process's interpreter. Fails if it was already claimed.
    pub fn acquire() -> Result<Self> {
        if CLAIMED.swap(true, Ordering::SeqCst) {
            return Err(DispatchError::new(ErrorKind::RuntimeInit {
                detail: "the Python runtime is already owned by another bridge".to_string(),
            }));
        }
        Ok(Self { numpy: None })
    }

    fn numpy<'py>(&self, py: Python<'py>) -> PyResult<&'py PyAny> {
        match &self.numpy {
            Some(numpy) => Ok(numpy.clone_ref(py).into_ref(py)),
            None => Ok(py.import("numpy")?),
        }
    }
}

/// Exception text with its traceback, as Python would print it
fn render(py: Python<'_>, err: PyErr) -> RuntimeException {
    let traceback = err
        .traceback(py)
        .and_then(|tb| tb.format().ok())
        .unwrap_or_default();
    RuntimeException::new(format!("{}{}", traceback, err))
}

impl EmbeddedRuntime for PythonRuntime {
    type Value = PyObject;

    fn lang(&self) -> Lang {
        Lang::Python
    }

    fn initialize(&mut self) -> core::result::Result<(), RuntimeException> {
        pyo3::prepare_freethreaded_python();
        Python::with_gil(|py| {
            let numpy = py.import("numpy").map_err(|e| render(py, e))?;
            py.import("ctypes").map_err(|e| render(py, e))?;
            self.numpy = Some(numpy.into());
            Ok(())
        })
    }

    fn load_module(&mut self, path: &Path, name: &str) -> core::result::Result<PyObject, RuntimeException> {
        Python::with_gil(|py| {
            let load = || -> PyResult<PyObject> {
                let util = py.import("importlib.util")?;
                let location = path.to_string_lossy();
                let spec = util.call_method1("spec_from_file_location", (name, location.as_ref()))?;
                if spec.is_none() {
                    return Err(PyImportError::new_err(format!(
                        "cannot build a module spec for '{}'",
                        location
                    )));
                }
                let module = util.call_method1("module_from_spec", (spec,))?;
                let modules = py.import("sys")?.getattr("modules")?;
                modules.set_item(name, module)?;
                if let Err(e) = spec.getattr("loader")?.call_method1("exec_module", (module,)) {
                    modules.del_item(name)?;
                    return Err(e);
                }
                Ok(module.into())
            };
            load().map_err(|e| render(py, e))
        })
    }

    /// Module attributes first, then attributes of the module's `Self` class,
    /// which take the instance as their first argument.
    fn lookup_function(
        &mut self,
        namespace: &PyObject,
        name: &str,
    ) -> core::result::Result<Option<PyObject>, RuntimeException> {
        Python::with_gil(|py| {
            let lookup = || -> PyResult<Option<PyObject>> {
                let module = namespace.as_ref(py);
                if module.hasattr(name)? {
                    return Ok(Some(module.getattr(name)?.into()));
                }
                if name != SELF_CONSTRUCTOR && module.hasattr(SELF_CONSTRUCTOR)? {
                    let class = module.getattr(SELF_CONSTRUCTOR)?;
                    if class.hasattr(name)? {
                        return Ok(Some(class.getattr(name)?.into()));
                    }
                }
                Ok(None)
            };
            lookup().map_err(|e| render(py, e))
        })
    }

    fn call(&mut self, function: &PyObject, args: &[PyObject]) -> core::result::Result<PyObject, RuntimeException> {
        Python::with_gil(|py| {
            let args = PyTuple::new(py, args.iter().map(|a| a.as_ref(py)));
            function
                .as_ref(py)
                .call1(args)
                .map(Into::into)
                .map_err(|e| render(py, e))
        })
    }

    fn box_f64(&mut self, value: f64) -> core::result::Result<PyObject, RuntimeException> {
        Ok(Python::with_gil(|py| value.into_py(py)))
    }

    fn box_pointer(&mut self, ptr: *mut c_void) -> core::result::Result<PyObject, RuntimeException> {
        Python::with_gil(|py| {
            py.import("ctypes")
                .and_then(|ctypes| ctypes.getattr("c_void_p"))
                .and_then(|c_void_p| c_void_p.call1((ptr as usize,)))
                .map(Into::into)
                .map_err(|e| render(py, e))
        })
    }

    unsafe fn array_view(
        &mut self,
        data: *mut f64,
        shape: &[usize],
    ) -> core::result::Result<PyObject, RuntimeException> {
        Python::with_gil(|py| {
            let view = || -> PyResult<PyObject> {
                let numpy = self.numpy(py)?;
                let dims = PyTuple::new(py, shape);
                let count: usize = shape.iter().product();
                if count == 0 {
                    return Ok(numpy.call_method1("empty", (dims,))?.into());
                }

                let ctypes = py.import("ctypes")?;
                let buffer_type = py
                    .import("operator")?
                    .call_method1("mul", (ctypes.getattr("c_double")?, count))?;
                let buffer = buffer_type.call_method1("from_address", (data as usize,))?;
                let flat = numpy.call_method1("frombuffer", (buffer, numpy.getattr("float64")?))?;
                Ok(flat.call_method1("reshape", (dims,))?.into())
            };
            view().map_err(|e| render(py, e))
        })
    }

    fn load_callback_module(&mut self) -> core::result::Result<PyObject, RuntimeException> {
        Python::with_gil(|py| {
            PyModule::from_code(py, CALLBACK_MODULE, "oif_callback.py", "oif_callback")
                .map(Into::into)
                .map_err(|e| render(py, e))
        })
    }

    fn classify_return(&mut self, value: &PyObject) -> Returned {
        Python::with_gil(|py| {
            let value = value.as_ref(py);
            if value.is_none() {
                return Returned::Nothing;
            }
            match value.extract::<i64>() {
                Ok(status) => Returned::Int(status),
                Err(_) => Returned::Other(
                    value
                        .get_type()
                        .name()
                        .map(str::to_string)
                        .unwrap_or_else(|_| "<unknown>".to_string()),
                ),
            }
        })
    }

    fn into_raw(&mut self, value: PyObject) -> *mut c_void {
        value.into_ptr() as *mut c_void
    }

    unsafe fn from_raw(&mut self, raw: *mut c_void) -> PyObject {
        Python::with_gil(|py| PyObject::from_borrowed_ptr(py, raw as *mut pyo3::ffi::PyObject))
    }

    /// The interpreter itself stays resident; finalizing it is not supported
    /// once extension modules such as NumPy are loaded.
    fn shutdown(&mut self) {
        self.numpy = None;
    }
}
