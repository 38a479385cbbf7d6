// Copyright (c) 2018 Nuclear Furnace
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Endpoint addressing.
//!
//! Addresses are fully-qualified type names (module path + type name), the same shape as a
//! source-language `module.ClassName`. `std::any::type_name` already produces exactly that shape
//! for us, so `fqcn` is a thin, typed wrapper around it rather than a runtime reflection call.

/// Returns the fully-qualified name used to address `T` as a router endpoint.
pub fn fqcn<T: ?Sized>() -> String {
    std::any::type_name::<T>().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ProcessA;

    #[test]
    fn fqcn_is_stable_across_calls() {
        assert_eq!(fqcn::<ProcessA>(), fqcn::<ProcessA>());
    }

    #[test]
    fn fqcn_includes_module_path() {
        let name = fqcn::<ProcessA>();
        assert!(name.ends_with("ProcessA"));
        assert!(name.contains("::"));
    }

    #[test]
    fn fqcn_distinguishes_types() {
        struct ProcessB;
        assert_ne!(fqcn::<ProcessA>(), fqcn::<ProcessB>());
    }
}
