//! # Derive Layer
//! Layer can be derived for a struct composed of parameters and other layers.\
//! Fields are opted in with an attribute:
//! - `#[pixelcnn(parameter)]`: a `Parameter`.
//! - `#[pixelcnn(optional_parameter)]`: an `Option<Parameter>`.
//! - `#[pixelcnn(layer)]`: a child that implements `Layer` (including `Vec<L>`).
//!
//! Fields without an attribute are ignored. Use `#[pixelcnn(crate)]` on the struct within
//! gated_pixelcnn itself.
//!```
//! use gated_pixelcnn::{
//!     layer::{Conv2, Layer, Relu},
//!     parameter::Parameter1,
//! };
//!
//! #[derive(Layer)]
//! struct Block {
//!     #[pixelcnn(layer)]
//!     conv: Conv2<Relu>,
//!     #[pixelcnn(optional_parameter)]
//!     scale: Option<Parameter1>,
//!     name: String,
//! }
//!```
//! Generates:\
//!```ignore
//! impl Layer for Block {
//!     fn parameters_len(&self) -> usize {
//!         0 + Layer::parameters_len(&self.conv) + usize::from(self.scale.is_some())
//!     }
//!     fn collect_parameters<'a>(&'a self, parameters: &mut Vec<ParameterViewD<'a>>) {
//!         Layer::collect_parameters(&self.conv, parameters);
//!         if let Some(parameter) = self.scale.as_ref() {
//!             parameters.push(parameter.view_dyn());
//!         }
//!     }
//!     fn collect_parameters_mut<'a>(&'a mut self, parameters: &mut Vec<ParameterViewMutD<'a>>) {
//!         Layer::collect_parameters_mut(&mut self.conv, parameters);
//!         if let Some(parameter) = self.scale.as_mut() {
//!             parameters.push(parameter.view_mut_dyn());
//!         }
//!     }
//! }
//!```

use proc_macro::TokenStream as BaseTokenStream;
use proc_macro2::TokenStream;
use quote::quote;
use syn::{
    parse_quote, Attribute, Data, DeriveInput, Error, Fields, GenericParam, Index, Member, Meta,
    NestedMeta, Result,
};

#[derive(Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Parameter,
    OptionalParameter,
    Layer,
}

fn pixelcnn_args(attributes: &[Attribute]) -> Result<Vec<syn::Path>> {
    let mut args = Vec::new();
    for attribute in attributes {
        if !attribute.path.is_ident("pixelcnn") {
            continue;
        }
        match attribute.parse_meta()? {
            Meta::List(list) => {
                for nested in list.nested {
                    match nested {
                        NestedMeta::Meta(Meta::Path(path)) => args.push(path),
                        nested => {
                            return Err(Error::new_spanned(nested, "expected an identifier"));
                        }
                    }
                }
            }
            meta => return Err(Error::new_spanned(meta, "expected #[pixelcnn(..)]")),
        }
    }
    Ok(args)
}

fn field_kind(attributes: &[Attribute]) -> Result<Option<FieldKind>> {
    let mut kind = None;
    for path in pixelcnn_args(attributes)? {
        let next = if path.is_ident("parameter") {
            FieldKind::Parameter
        } else if path.is_ident("optional_parameter") {
            FieldKind::OptionalParameter
        } else if path.is_ident("layer") {
            FieldKind::Layer
        } else {
            return Err(Error::new_spanned(
                path,
                "expected `parameter`, `optional_parameter` or `layer`",
            ));
        };
        if kind.replace(next).is_some() {
            return Err(Error::new_spanned(path, "field attribute specified twice"));
        }
    }
    Ok(kind)
}

fn is_crate(attributes: &[Attribute]) -> Result<bool> {
    for path in pixelcnn_args(attributes)? {
        if path.is_ident("crate") {
            return Ok(true);
        }
        return Err(Error::new_spanned(path, "expected `crate`"));
    }
    Ok(false)
}

fn derive_layer_impl(mut input: DeriveInput) -> Result<TokenStream> {
    let krate = if is_crate(&input.attrs)? {
        quote! { crate }
    } else {
        quote! { ::gated_pixelcnn }
    };
    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => fields.named.iter().collect(),
            Fields::Unnamed(fields) => fields.unnamed.iter().collect(),
            Fields::Unit => Vec::new(),
        },
        _ => {
            return Err(Error::new_spanned(
                &input.ident,
                "Layer can only be derived for structs",
            ))
        }
    };
    let mut len_impl = quote! { 0 };
    let mut collect_impl = TokenStream::new();
    let mut collect_mut_impl = TokenStream::new();
    for (i, field) in fields.into_iter().enumerate() {
        let kind = if let Some(kind) = field_kind(&field.attrs)? {
            kind
        } else {
            continue;
        };
        let member = if let Some(ident) = &field.ident {
            Member::Named(ident.clone())
        } else {
            Member::Unnamed(Index::from(i))
        };
        match kind {
            FieldKind::Parameter => {
                len_impl.extend(quote! { + 1 });
                collect_impl.extend(quote! {
                    parameters.push(#krate::parameter::Parameter::view_dyn(&self.#member));
                });
                collect_mut_impl.extend(quote! {
                    parameters.push(#krate::parameter::Parameter::view_mut_dyn(&mut self.#member));
                });
            }
            FieldKind::OptionalParameter => {
                len_impl.extend(quote! { + usize::from(self.#member.is_some()) });
                collect_impl.extend(quote! {
                    if let Some(parameter) = self.#member.as_ref() {
                        parameters.push(#krate::parameter::Parameter::view_dyn(parameter));
                    }
                });
                collect_mut_impl.extend(quote! {
                    if let Some(parameter) = self.#member.as_mut() {
                        parameters.push(#krate::parameter::Parameter::view_mut_dyn(parameter));
                    }
                });
            }
            FieldKind::Layer => {
                len_impl.extend(quote! { + #krate::layer::Layer::parameters_len(&self.#member) });
                collect_impl.extend(quote! {
                    #krate::layer::Layer::collect_parameters(&self.#member, parameters);
                });
                collect_mut_impl.extend(quote! {
                    #krate::layer::Layer::collect_parameters_mut(&mut self.#member, parameters);
                });
            }
        }
    }
    for param in input.generics.params.iter_mut() {
        if let GenericParam::Type(param) = param {
            param.bounds.push(parse_quote!(#krate::layer::Layer));
        }
    }
    let ident = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    Ok(quote! {
        impl #impl_generics #krate::layer::Layer for #ident #ty_generics #where_clause {
            fn parameters_len(&self) -> usize {
                #len_impl
            }
            #[allow(unused_variables)]
            fn collect_parameters<'a>(
                &'a self,
                parameters: &mut ::std::vec::Vec<#krate::parameter::ParameterViewD<'a>>,
            ) {
                #collect_impl
            }
            #[allow(unused_variables)]
            fn collect_parameters_mut<'a>(
                &'a mut self,
                parameters: &mut ::std::vec::Vec<#krate::parameter::ParameterViewMutD<'a>>,
            ) {
                #collect_mut_impl
            }
        }
    })
}

#[proc_macro_derive(Layer, attributes(pixelcnn))]
pub fn derive_layer(input: BaseTokenStream) -> BaseTokenStream {
    let input = syn::parse_macro_input!(input as DeriveInput);
    match derive_layer_impl(input) {
        Ok(output) => output.into(),
        Err(error) => error.to_compile_error().into(),
    }
}
