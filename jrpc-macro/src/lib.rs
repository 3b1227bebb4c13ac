//! # jrpc Procedural Macros
//!
//! ## `#[service]`
//!
//! Turns a trait into a JSON-RPC service. It generates:
//! - a static `ServiceDescriptor` describing every method,
//! - `jrpc_export`, exposing an implementation on a `HandlerRegistry`,
//! - an implementation of the trait for `jrpc::Client` that sends the
//!   calls to the peer.
//!
//! ```rust,ignore
//! #[jrpc::service(base_path = "math", timeout_ms = 1000)]
//! pub trait MathService {
//!     async fn add(&self, ctx: &Context, a: i64, b: i64) -> Result<i64>;
//!
//!     #[jrpc(params = "single")]
//!     async fn sum(&self, ctx: &Context, values: Vec<i64>) -> Result<i64>;
//!
//!     #[jrpc(notification, name = "events/tick")]
//!     fn tick(&self, ctx: &Context, count: u64) -> Result<()>;
//!
//!     #[jrpc(timeout_ms = -1)]
//!     fn wait(&self, ctx: &Context, ms: u64) -> ResponseFuture<u64>;
//! }
//! ```
//!
//! Method shapes:
//! - `async fn m(&self, ctx: &Context, args..) -> Result<T>`: a request.
//!   The stub awaits the response.
//! - `fn m(&self, ctx: &Context, args..) -> ResponseFuture<T>`: a request
//!   whose stub returns the future without waiting.
//! - `#[jrpc(notification)]` on `async fn` or `fn` returning `Result<()>`:
//!   a notification. The stub returns once the message is posted.
//!
//! Method options in `#[jrpc(..)]`: `name` overrides the exposed name,
//! `params` is one of `single`, `positional` (default) or `named`,
//! `timeout_ms` overrides the service timeout and a negative value
//! disables it.

use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::{format_ident, quote};
use syn::{
    FnArg, GenericArgument, Ident, ItemTrait, LitInt, LitStr, Pat, PathArguments, ReturnType,
    Signature, Token, TraitItem, TraitItemFn, Type, parse_macro_input, parse_quote,
    spanned::Spanned,
};

const RESERVED: [&str; 4] = ["jrpc_export", "jrpc_service", "jrpc_request", "jrpc_notify"];

#[derive(Default)]
struct ServiceArgs {
    base_path: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Default)]
struct MethodArgs {
    name: Option<String>,
    packing: Option<Ident>,
    notification: bool,
    timeout_ms: Option<i64>,
}

#[derive(Clone, Copy)]
enum Shape {
    /// `async fn -> Result<T>`.
    Async,
    /// `fn -> ResponseFuture<T>`.
    Future,
    /// `fn -> Result<()>`, notifications only.
    Sync,
}

struct Arg {
    name: String,
    ty: Type,
}

/// Defines a JSON-RPC service trait. See the crate docs.
#[proc_macro_attribute]
pub fn service(attr: TokenStream, input: TokenStream) -> TokenStream {
    let mut args = ServiceArgs::default();
    let parser = syn::meta::parser(|meta| {
        if meta.path.is_ident("base_path") {
            args.base_path = Some(meta.value()?.parse::<LitStr>()?.value());
            Ok(())
        } else if meta.path.is_ident("timeout_ms") {
            args.timeout_ms = Some(meta.value()?.parse::<LitInt>()?.base10_parse()?);
            Ok(())
        } else {
            Err(meta.error("expected `base_path` or `timeout_ms`"))
        }
    });
    parse_macro_input!(attr with parser);

    let input = parse_macro_input!(input as ItemTrait);
    expand(&args, input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand(args: &ServiceArgs, mut input: ItemTrait) -> syn::Result<TokenStream2> {
    let krate = get_crate_name();
    let trait_ident = input.ident.clone();
    let trait_name = trait_ident.to_string();
    let descriptor = format_ident!("__JRPC_SERVICE_{}", trait_name.to_uppercase());

    let mut descriptors = vec![];
    let mut exports = vec![];
    let mut client_methods = vec![];

    for (index, item) in input.items.iter_mut().enumerate() {
        let span = item.span();
        let TraitItem::Fn(method) = item else {
            return Err(syn::Error::new(
                span,
                "a service trait may only contain methods",
            ));
        };
        let method_args = take_method_args(method)?;
        let sig = &method.sig;
        let method_ident = &sig.ident;
        if RESERVED.iter().any(|name| *method_ident == name) {
            return Err(syn::Error::new(
                method_ident.span(),
                format!("`{method_ident}` is reserved"),
            ));
        }
        if !sig.generics.params.is_empty() {
            return Err(syn::Error::new(
                sig.generics.span(),
                "service methods cannot be generic",
            ));
        }

        let (ctx_ty, call_args) = split_inputs(sig)?;
        let (shape, result_ty) = classify(sig, method_args.notification)?;
        let output = match &sig.output {
            ReturnType::Type(_, ty) => ty.as_ref().clone(),
            ReturnType::Default => unreachable!("checked by classify"),
        };

        // descriptor entry.
        let ident_str = method_ident.to_string();
        let name = option_tokens(method_args.name.as_ref().map(|n| quote!(#n)));
        let kind = if method_args.notification {
            quote!(#krate::DispatchKind::Notification)
        } else {
            quote!(#krate::DispatchKind::Request)
        };
        let packing = option_tokens(
            method_args
                .packing
                .as_ref()
                .map(|p| quote!(#krate::ParamsPacking::#p)),
        );
        let param_names = call_args.iter().map(|arg| &arg.name);
        let result_type = quote!(#result_ty).to_string().replace(' ', "");
        let returns_future = matches!(shape, Shape::Future);
        let timeout_ms = option_tokens(method_args.timeout_ms.map(|t| quote!(#t)));
        descriptors.push(quote! {
            #krate::MethodDescriptor {
                ident: #ident_str,
                name: #name,
                kind: #kind,
                packing: #packing,
                params: &[#(#param_names),*],
                result_type: #result_type,
                returns_future: #returns_future,
                timeout_ms: #timeout_ms,
            }
        });

        // server side.
        let arg_idents: Vec<Ident> = (0..call_args.len())
            .map(|i| format_ident!("__arg{i}"))
            .collect();
        let decodes = call_args.iter().zip(&arg_idents).enumerate().map(|(i, (arg, ident))| {
            let (owned, _) = owned_type(&arg.ty);
            let label = if arg.name.is_empty() {
                i.to_string()
            } else {
                arg.name.clone()
            };
            quote! {
                let #ident: #owned = #krate::params::decode(args.next().unwrap_or_default(), #label)?;
            }
        });
        let passes = call_args.iter().zip(&arg_idents).map(|(arg, ident)| {
            if owned_type(&arg.ty).1 {
                quote!(&#ident)
            } else {
                quote!(#ident)
            }
        });
        let unpack = if call_args.is_empty() {
            quote!(let _ = args;)
        } else {
            quote!(let mut args = args.into_iter();)
        };
        let call = quote!(this.#method_ident(&ctx, #(#passes),*));
        let call = match shape {
            Shape::Async | Shape::Future => quote!(#call.await),
            Shape::Sync => call,
        };
        exports.push(quote! {
            {
                let mapping = registry
                    .resolver()
                    .resolve(&#descriptor, &#descriptor.methods[#index])?;
                let this = self.clone();
                registry.export(mapping, move |ctx: #krate::Context, args: ::std::vec::Vec<#krate::serde_json::Value>| {
                    let this = this.clone();
                    async move {
                        #unpack
                        #(#decodes)*
                        #call
                    }
                })?;
            }
        });

        // client side.
        let arg_types = call_args.iter().map(|arg| &arg.ty);
        let encode_args = quote! {
            let args = (|| -> #krate::Result<::std::vec::Vec<#krate::serde_json::Value>> {
                ::std::result::Result::Ok(::std::vec![#(#krate::params::encode(&#arg_idents)?),*])
            })();
        };
        let target = quote!(&#descriptor, &#descriptor.methods[#index]);
        let client_method = match (shape, method_args.notification) {
            (Shape::Future, _) => quote! {
                fn #method_ident(&self, ctx: #ctx_ty, #(#arg_idents: #arg_types),*) -> #output {
                    #encode_args
                    self.jrpc_request(ctx, #target, args)
                }
            },
            (Shape::Async, false) => quote! {
                async fn #method_ident(&self, ctx: #ctx_ty, #(#arg_idents: #arg_types),*) -> #output {
                    #encode_args
                    self.jrpc_request(ctx, #target, args).await
                }
            },
            (Shape::Async, true) => quote! {
                async fn #method_ident(&self, ctx: #ctx_ty, #(#arg_idents: #arg_types),*) -> #output {
                    #encode_args
                    self.jrpc_notify(ctx, #target, args)
                }
            },
            (Shape::Sync, _) => quote! {
                fn #method_ident(&self, ctx: #ctx_ty, #(#arg_idents: #arg_types),*) -> #output {
                    #encode_args
                    self.jrpc_notify(ctx, #target, args)
                }
            },
        };
        client_methods.push(client_method);

        // `async fn` in the trait becomes `fn -> impl Future + Send` so the
        // exported handlers can run on any worker thread.
        if matches!(shape, Shape::Async) {
            method.sig.asyncness = None;
            method.sig.output = parse_quote! {
                -> impl ::core::future::Future<Output = #output> + ::core::marker::Send
            };
            if let Some(block) = method.default.take() {
                method.default = Some(parse_quote!({ async move #block }));
            }
        }
    }

    let base_path = option_tokens(args.base_path.as_ref().map(|p| quote!(#p)));
    let timeout_ms = option_tokens(args.timeout_ms.map(|t| quote!(#t)));

    input.items.push(parse_quote! {
        /// Compile-time description of this service.
        fn jrpc_service() -> &'static #krate::ServiceDescriptor
        where
            Self: Sized,
        {
            &#descriptor
        }
    });
    input.items.push(parse_quote! {
        /// Registers every method of this service on `registry`.
        ///
        /// # Errors
        ///
        /// Returns an error if a method mapping is invalid or a request
        /// method is already registered.
        fn jrpc_export(
            self: ::std::sync::Arc<Self>,
            registry: &#krate::HandlerRegistry,
        ) -> #krate::Result<()>
        where
            Self: Sized + ::core::marker::Send + ::core::marker::Sync + 'static,
        {
            #(#exports)*
            ::std::result::Result::Ok(())
        }
    });

    Ok(quote! {
        static #descriptor: #krate::ServiceDescriptor = #krate::ServiceDescriptor {
            name: #trait_name,
            base_path: #base_path,
            timeout_ms: #timeout_ms,
            methods: &[#(#descriptors),*],
        };

        #input

        #[allow(clippy::redundant_closure_call)]
        impl #trait_ident for #krate::Client {
            #(#client_methods)*
        }
    })
}

/// Parses and strips the `#[jrpc(..)]` attributes of a method.
fn take_method_args(method: &mut TraitItemFn) -> syn::Result<MethodArgs> {
    let mut args = MethodArgs::default();
    let mut result = Ok(());
    method.attrs.retain(|attr| {
        if !attr.path().is_ident("jrpc") {
            return true;
        }
        let parsed = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                args.name = Some(meta.value()?.parse::<LitStr>()?.value());
            } else if meta.path.is_ident("notification") {
                args.notification = true;
            } else if meta.path.is_ident("params") {
                let lit = meta.value()?.parse::<LitStr>()?;
                let variant = match lit.value().as_str() {
                    "single" => "Single",
                    "positional" => "Positional",
                    "named" => "Named",
                    _ => {
                        return Err(syn::Error::new(
                            lit.span(),
                            "expected `single`, `positional` or `named`",
                        ));
                    }
                };
                args.packing = Some(Ident::new(variant, lit.span()));
            } else if meta.path.is_ident("timeout_ms") {
                let input = meta.value()?;
                let negative = input.peek(Token![-]);
                if negative {
                    input.parse::<Token![-]>()?;
                }
                let value: i64 = input.parse::<LitInt>()?.base10_parse()?;
                args.timeout_ms = Some(if negative { -value } else { value });
            } else {
                return Err(meta.error("unsupported jrpc method option"));
            }
            Ok(())
        });
        if let Err(e) = parsed {
            result = Err(e);
        }
        false
    });
    result.map(|()| args)
}

/// Checks the `&self, ctx` prefix and returns the context type and the
/// call arguments.
fn split_inputs(sig: &Signature) -> syn::Result<(Type, Vec<Arg>)> {
    let shape_error = || {
        syn::Error::new(
            sig.span(),
            "expected `fn method(&self, ctx: &Context, args..)`",
        )
    };
    match sig.receiver() {
        Some(receiver) if receiver.reference.is_some() && receiver.mutability.is_none() => {}
        _ => return Err(shape_error()),
    }
    let mut inputs = sig.inputs.iter().skip(1);
    let Some(FnArg::Typed(ctx)) = inputs.next() else {
        return Err(shape_error());
    };

    let args = inputs
        .map(|input| match input {
            FnArg::Typed(arg) => {
                let name = match arg.pat.as_ref() {
                    Pat::Ident(ident) => ident.ident.to_string(),
                    Pat::Wild(_) => String::new(),
                    other => {
                        return Err(syn::Error::new(
                            other.span(),
                            "service arguments must be identifiers or `_`",
                        ));
                    }
                };
                Ok(Arg {
                    name,
                    ty: arg.ty.as_ref().clone(),
                })
            }
            FnArg::Receiver(receiver) => Err(syn::Error::new(receiver.span(), "unexpected receiver")),
        })
        .collect::<syn::Result<_>>()?;
    Ok((ctx.ty.as_ref().clone(), args))
}

/// Determines the method shape and the carried result type.
fn classify(sig: &Signature, notification: bool) -> syn::Result<(Shape, Type)> {
    let ReturnType::Type(_, output) = &sig.output else {
        return Err(syn::Error::new(
            sig.span(),
            "service methods must return `Result<T>` or `ResponseFuture<T>`",
        ));
    };
    if sig.asyncness.is_some() {
        if let Some(ty) = generic_of(output, "Result") {
            return Ok((Shape::Async, ty));
        }
    } else if let Some(ty) = generic_of(output, "ResponseFuture") {
        return Ok((Shape::Future, ty));
    } else if notification && let Some(ty) = generic_of(output, "Result") {
        return Ok((Shape::Sync, ty));
    }
    Err(syn::Error::new(
        output.span(),
        "expected `async fn .. -> Result<T>`, `fn .. -> ResponseFuture<T>`, \
         or a notification `fn .. -> Result<()>`",
    ))
}

/// The first type argument of `ty` if its last path segment is `wrapper`.
fn generic_of(ty: &Type, wrapper: &str) -> Option<Type> {
    let Type::Path(path) = ty else {
        return None;
    };
    let segment = path.path.segments.last()?;
    if segment.ident != wrapper {
        return None;
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    args.args.iter().find_map(|arg| match arg {
        GenericArgument::Type(ty) => Some(ty.clone()),
        _ => None,
    })
}

/// The owned type an argument is decoded into, and whether the method
/// takes it by reference.
fn owned_type(ty: &Type) -> (Type, bool) {
    let Type::Reference(reference) = ty else {
        return (ty.clone(), false);
    };
    let owned = match reference.elem.as_ref() {
        Type::Path(path) if path.path.is_ident("str") => parse_quote!(::std::string::String),
        Type::Slice(slice) => {
            let elem = &slice.elem;
            parse_quote!(::std::vec::Vec<#elem>)
        }
        elem => elem.clone(),
    };
    (owned, true)
}

fn option_tokens(value: Option<TokenStream2>) -> TokenStream2 {
    match value {
        Some(value) => quote!(::core::option::Option::Some(#value)),
        None => quote!(::core::option::Option::None),
    }
}

/// Gets the path of the jrpc crate as seen from the expansion site.
///
/// Inside jrpc itself the name resolves through `extern crate self as jrpc`.
pub(crate) fn get_crate_name() -> TokenStream2 {
    match proc_macro_crate::crate_name("jrpc") {
        Ok(proc_macro_crate::FoundCrate::Name(name)) => {
            let ident = Ident::new(&name, Span::call_site());
            quote! { ::#ident }
        }
        _ => quote! { ::jrpc },
    }
}
