#![allow(dead_code)]

#[derive(calmform::form::FormModel)]
struct Empty {}

fn main() {}
