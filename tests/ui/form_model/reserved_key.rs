#![allow(dead_code)]

#[derive(calmform::form::FormModel)]
struct Login {
    email: String,
    _submit: bool,
}

fn main() {}
