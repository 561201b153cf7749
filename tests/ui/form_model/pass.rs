use calmform::form::{FieldKey, FieldLens, FormModel};

#[derive(Clone, Debug, PartialEq, calmform::form::FormModel)]
struct OtpForm {
    contact: String,
    otp_code: String,
}

fn main() {
    let fields = OtpForm::fields();
    let lens = fields.otp_code();
    let mut model = OtpForm {
        contact: "jane@x.com".to_string(),
        otp_code: String::new(),
    };
    lens.set(&mut model, "123456".to_string());
    assert_eq!(lens.key().as_str(), "otp_code");
    assert_eq!(lens.get(&model), "123456");
    assert_eq!(
        OtpForm::field_keys(),
        &[FieldKey::new("contact"), FieldKey::new("otp_code")]
    );
}
