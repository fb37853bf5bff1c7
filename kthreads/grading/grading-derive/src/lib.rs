use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{quote, quote_spanned};
use syn::{Ident, ItemFn, parse_macro_input, spanned::Spanned};

/// Registers a kernel test case as a `#[test]`.
///
/// `#[kernel_test]` expects the kernel to halt normally once the test
/// returns. `#[kernel_test(deadlock)]` expects the kernel to detect that
/// every thread is blocked for good.
#[proc_macro_attribute]
pub fn kernel_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input_fn = parse_macro_input!(item as ItemFn);
    let runner = match expectation(attr.into()) {
        Ok(runner) => runner,
        Err(e) => return e.to_compile_error().into(),
    };
    if !input_fn.sig.inputs.is_empty() || input_fn.sig.asyncness.is_some() {
        return syn::Error::new(
            input_fn.sig.span(),
            "a kernel test takes no argument and is not async",
        )
        .to_compile_error()
        .into();
    }

    let name = &input_fn.sig.ident;
    TokenStream::from(quote_spanned! { input_fn.span() =>
        #input_fn

        #[cfg(test)]
        mod #name {
            #[test]
            fn kernel() {
                ::grading::TestDriver::#runner(&super::#name)
            }
        }
    })
}

fn expectation(attr: TokenStream2) -> syn::Result<TokenStream2> {
    if attr.is_empty() {
        return Ok(quote!(run));
    }
    let ident: Ident = syn::parse2(attr)?;
    if ident == "deadlock" {
        Ok(quote!(run_expecting_deadlock))
    } else {
        Err(syn::Error::new(
            ident.span(),
            "expected `deadlock` or no argument",
        ))
    }
}
