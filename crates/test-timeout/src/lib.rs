use proc_macro::TokenStream;
use quote::quote;
use syn::punctuated::Punctuated;
use syn::{parse_macro_input, Attribute, Expr, ExprLit, ExprPath, ItemFn, Lit, Token};

/// Runs an async test on a fresh current-thread runtime with a wall-clock deadline.
///
/// Arguments, all optional and comma separated:
/// - an integer timeout in seconds (default 60)
/// - `paused`, which starts the runtime with the tokio clock paused so timers auto-advance.
///   The deadline is then only enforced in real time, since virtual time may legitimately run
///   far ahead of it.
#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut timeout_secs: u64 = 60;
    let mut paused = false;

    let args = parse_macro_input!(attr with Punctuated::<Expr, Token![,]>::parse_terminated);
    for arg in args {
        match arg {
            Expr::Lit(ExprLit {
                lit: Lit::Int(lit), ..
            }) => {
                timeout_secs = match lit.base10_parse() {
                    Ok(value) => value,
                    Err(err) => return err.to_compile_error().into(),
                };
                if timeout_secs == 0 {
                    return syn::Error::new_spanned(lit, "timeout must be greater than zero")
                        .to_compile_error()
                        .into();
                }
            }
            Expr::Path(ExprPath { ref path, .. }) if path.is_ident("paused") => paused = true,
            other => {
                return syn::Error::new_spanned(
                    other,
                    "expected a timeout in seconds or `paused`",
                )
                .to_compile_error()
                .into();
            }
        }
    }

    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            &sig.ident,
            "tokio_timeout_test can only be applied to async functions",
        )
        .to_compile_error()
        .into();
    }

    sig.asyncness = None;

    let filtered_attrs: Vec<Attribute> = attrs
        .into_iter()
        .filter(|attr| !is_tokio_test_attribute(attr))
        .collect();

    let timeout = timeout_secs;
    let body = if paused {
        quote! {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .start_paused(true)
                .build()
                .expect("failed to build Tokio runtime");
            runtime.block_on(async move #block);
        }
    } else {
        quote! {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build Tokio runtime");
            runtime.block_on(async {
                tokio::time::timeout(timeout_duration, async move #block)
                    .await
                    .expect("test timed out");
            });
        }
    };

    TokenStream::from(quote! {
        #[test]
        #(#filtered_attrs)*
        #vis #sig {
            let timeout_duration = std::time::Duration::from_secs(#timeout);
            let (sender, receiver) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    #body
                }));
                let _ = sender.send(result);
            });
            match receiver.recv_timeout(timeout_duration) {
                Ok(Ok(_)) => {}
                Ok(Err(payload)) => std::panic::resume_unwind(payload),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => panic!("test timed out"),
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread failed before reporting result")
                }
            }
        }
    })
}

fn is_tokio_test_attribute(attr: &Attribute) -> bool {
    let mut segments = attr.path().segments.iter();
    matches!(
        (segments.next(), segments.next(), segments.next()),
        (Some(first), Some(second), None)
            if first.ident == "tokio" && second.ident == "test"
    )
}
